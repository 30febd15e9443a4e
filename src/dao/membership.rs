use std::collections::{HashMap, HashSet};

use futures::future::{self, BoxFuture};

use crate::dao::storage::StorageResult;

/// Authorization check performed at the gateway before a user may join a group's room.
pub trait MembershipDirectory: Send + Sync {
    /// Whether `user_id` belongs to `group_id`.
    fn is_member(&self, group_id: String, user_id: String) -> BoxFuture<'static, StorageResult<bool>>;
}

/// Directory admitting every user into every group.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenMembership;

impl MembershipDirectory for OpenMembership {
    fn is_member(&self, _group_id: String, _user_id: String) -> BoxFuture<'static, StorageResult<bool>> {
        Box::pin(future::ready(Ok(true)))
    }
}

/// Directory backed by a fixed roster; groups it does not list stay open.
#[derive(Debug, Clone, Default)]
pub struct StaticMembership {
    groups: HashMap<String, HashSet<String>>,
}

impl StaticMembership {
    /// Build a directory from `group -> members` pairs.
    pub fn new(groups: HashMap<String, Vec<String>>) -> Self {
        Self {
            groups: groups
                .into_iter()
                .map(|(group, members)| (group, members.into_iter().collect()))
                .collect(),
        }
    }

    /// Whether no group is restricted.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    fn check(&self, group_id: &str, user_id: &str) -> bool {
        self.groups
            .get(group_id)
            .is_none_or(|members| members.contains(user_id))
    }
}

impl MembershipDirectory for StaticMembership {
    fn is_member(&self, group_id: String, user_id: String) -> BoxFuture<'static, StorageResult<bool>> {
        Box::pin(future::ready(Ok(self.check(&group_id, &user_id))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_roster_restricts_only_listed_groups() {
        let directory = StaticMembership::new(HashMap::from([(
            "smiths".to_string(),
            vec!["ann".to_string(), "joe".to_string()],
        )]));

        assert!(directory.is_member("smiths".into(), "ann".into()).await.unwrap());
        assert!(!directory.is_member("smiths".into(), "eve".into()).await.unwrap());
        assert!(directory.is_member("jones".into(), "eve".into()).await.unwrap());
    }
}
