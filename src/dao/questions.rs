use futures::future::BoxFuture;

use crate::dao::{
    models::{Difficulty, QuestionEntity},
    storage::StorageResult,
};

/// Parameters a host supplies when starting a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionRequest {
    /// Restrict to one category (case-insensitive).
    pub category: Option<String>,
    /// Restrict to one difficulty tier.
    pub difficulty: Option<Difficulty>,
    /// Number of questions wanted for the session.
    pub count: usize,
}

/// Source of the fixed question list a session runs through.
pub trait QuestionSupply: Send + Sync {
    /// Fetch an ordered list of questions for `group_id`.
    fn fetch_session_questions(
        &self,
        group_id: String,
        request: QuestionRequest,
    ) -> BoxFuture<'static, StorageResult<Vec<QuestionEntity>>>;
}

/// Deterministic question bank used whenever the configured supply fails.
#[derive(Debug, Clone)]
pub struct FallbackQuestionBank {
    questions: Vec<QuestionEntity>,
}

impl FallbackQuestionBank {
    /// Build a bank from explicit questions, keeping only the playable ones.
    ///
    /// Falls back to [`FallbackQuestionBank::builtin`] when nothing playable remains so the bank
    /// can never come up empty.
    pub fn new(questions: Vec<QuestionEntity>) -> Self {
        let questions: Vec<_> = questions.into_iter().filter(|q| q.is_playable()).collect();
        if questions.is_empty() {
            Self::builtin()
        } else {
            Self { questions }
        }
    }

    /// Bank shipped with the binary.
    pub fn builtin() -> Self {
        Self {
            questions: builtin_questions(),
        }
    }

    /// Number of questions in the bank.
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    /// Whether the bank holds no question (never true for a constructed bank).
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Pick questions for a request; see [`select_questions`].
    pub fn select(&self, request: &QuestionRequest) -> Vec<QuestionEntity> {
        select_questions(&self.questions, request)
    }
}

/// Pick questions for a request out of a pool.
///
/// Filters on category and difficulty first, then widens to category only and finally to the
/// whole pool if a filter leaves nothing. Selection is stable: the same pool and request always
/// yield the same sequence.
pub fn select_questions(pool: &[QuestionEntity], request: &QuestionRequest) -> Vec<QuestionEntity> {
    let count = request.count.max(1);
    let category_matches = |q: &&QuestionEntity| {
        request
            .category
            .as_deref()
            .is_none_or(|category| q.category.eq_ignore_ascii_case(category))
    };
    let difficulty_matches =
        |q: &&QuestionEntity| request.difficulty.is_none_or(|d| q.difficulty == d);

    let strict: Vec<_> = pool
        .iter()
        .filter(category_matches)
        .filter(difficulty_matches)
        .take(count)
        .cloned()
        .collect();
    if !strict.is_empty() {
        return strict;
    }

    let by_category: Vec<_> = pool
        .iter()
        .filter(category_matches)
        .take(count)
        .cloned()
        .collect();
    if !by_category.is_empty() {
        return by_category;
    }

    pool.iter().take(count).cloned().collect()
}

impl Default for FallbackQuestionBank {
    fn default() -> Self {
        Self::builtin()
    }
}

fn question(
    id: &str,
    prompt: &str,
    choices: [&str; 4],
    correct: &str,
    category: &str,
    difficulty: Difficulty,
) -> QuestionEntity {
    let (time_limit_seconds, point_value) = match difficulty {
        Difficulty::Easy => (15, 10),
        Difficulty::Medium => (20, 20),
        Difficulty::Hard => (30, 30),
    };
    QuestionEntity {
        id: id.to_string(),
        prompt: prompt.to_string(),
        choices: choices.iter().map(|c| c.to_string()).collect(),
        correct_choice: correct.to_string(),
        category: category.to_string(),
        difficulty,
        time_limit_seconds,
        point_value,
    }
}

fn builtin_questions() -> Vec<QuestionEntity> {
    vec![
        question(
            "builtin-geo-1",
            "What is the capital of Australia?",
            ["Sydney", "Canberra", "Melbourne", "Perth"],
            "Canberra",
            "geography",
            Difficulty::Easy,
        ),
        question(
            "builtin-geo-2",
            "Which river flows through Budapest?",
            ["Danube", "Rhine", "Vistula", "Elbe"],
            "Danube",
            "geography",
            Difficulty::Medium,
        ),
        question(
            "builtin-geo-3",
            "Which country has the most time zones, overseas territories included?",
            ["Russia", "United States", "France", "China"],
            "France",
            "geography",
            Difficulty::Hard,
        ),
        question(
            "builtin-sci-1",
            "What gas do plants absorb from the air?",
            ["Oxygen", "Nitrogen", "Carbon dioxide", "Helium"],
            "Carbon dioxide",
            "science",
            Difficulty::Easy,
        ),
        question(
            "builtin-sci-2",
            "How many bones does an adult human have?",
            ["186", "206", "226", "246"],
            "206",
            "science",
            Difficulty::Medium,
        ),
        question(
            "builtin-sci-3",
            "Which element has the chemical symbol W?",
            ["Tungsten", "Vanadium", "Lead", "Xenon"],
            "Tungsten",
            "science",
            Difficulty::Hard,
        ),
        question(
            "builtin-his-1",
            "In which year did the first person walk on the Moon?",
            ["1965", "1969", "1972", "1959"],
            "1969",
            "history",
            Difficulty::Easy,
        ),
        question(
            "builtin-his-2",
            "Which empire built Machu Picchu?",
            ["Aztec", "Maya", "Inca", "Olmec"],
            "Inca",
            "history",
            Difficulty::Medium,
        ),
        question(
            "builtin-his-3",
            "Which treaty ended the Thirty Years' War?",
            ["Utrecht", "Westphalia", "Versailles", "Tordesillas"],
            "Westphalia",
            "history",
            Difficulty::Hard,
        ),
        question(
            "builtin-fam-1",
            "How many legs does a spider have?",
            ["Six", "Eight", "Ten", "Twelve"],
            "Eight",
            "family",
            Difficulty::Easy,
        ),
        question(
            "builtin-fam-2",
            "What colour do you get by mixing blue and yellow?",
            ["Green", "Purple", "Orange", "Brown"],
            "Green",
            "family",
            Difficulty::Easy,
        ),
        question(
            "builtin-fam-3",
            "Which planet is known as the Red Planet?",
            ["Venus", "Jupiter", "Mars", "Mercury"],
            "Mars",
            "family",
            Difficulty::Medium,
        ),
    ]
}
