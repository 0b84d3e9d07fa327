use std::collections::HashMap;

use thiserror::Error;

use crate::models::user::Group as GroupState;

#[derive(Debug, Error)]
pub enum GroupsError {
    #[error("permit <{0}> does not exist")]
    PermitNotExists(String),
    #[error("group <{0}> does not exist")]
    GroupNotExists(String),
    #[error("user <{0}> must have a tripcode to join group <{1}>")]
    TripcodeRequired(String, String),
}

/// Default permits: lower number = more privileged (§4.5 Groups and permits).
pub fn default_permits() -> HashMap<String, i64> {
    HashMap::from([
        ("admin".to_string(), 0),
        ("moder".to_string(), 1),
        ("dj".to_string(), 50),
        ("user".to_string(), 100),
    ])
}

/// Owns the live group table for one Bot; the backing [`GroupState`] is
/// what gets serialized back into `session.bot.groups` on heartbeat.
pub struct GroupsManager {
    permits: HashMap<String, i64>,
    groups: HashMap<String, GroupState>,
}

impl GroupsManager {
    pub fn new(groups: HashMap<String, GroupState>, permits: HashMap<String, i64>) -> Self {
        GroupsManager { permits, groups }
    }

    pub fn snapshot(&self) -> HashMap<String, GroupState> {
        self.groups.clone()
    }

    pub fn get_group(&self, name: &str) -> Result<&GroupState, GroupsError> {
        self.groups.get(name).ok_or_else(|| GroupsError::GroupNotExists(name.to_string()))
    }

    pub fn add_group(&mut self, name: &str, permit: &str, require_tripcode: bool) -> Result<(), GroupsError> {
        if !self.permits.contains_key(permit) {
            return Err(GroupsError::PermitNotExists(permit.to_string()));
        }
        self.groups.insert(
            name.to_string(),
            GroupState { permit: permit.to_string(), require_tripcode, members: HashMap::new() },
        );
        Ok(())
    }

    pub fn remove_group(&mut self, name: &str) {
        self.groups.remove(name);
    }

    /// Accepts the user's current tripcode list (empty = accept any) and
    /// appends this tripcode if new.
    pub fn add_user(&mut self, group: &str, name: &str, tripcode: Option<&str>) -> Result<(), GroupsError> {
        let g = self.groups.get_mut(group).ok_or_else(|| GroupsError::GroupNotExists(group.to_string()))?;
        if g.require_tripcode && tripcode.is_none() {
            return Err(GroupsError::TripcodeRequired(name.to_string(), group.to_string()));
        }
        let entry = g.members.entry(name.to_string()).or_default();
        if let Some(tripcode) = tripcode {
            if !entry.contains(&tripcode.to_string()) {
                entry.push(tripcode.to_string());
            }
        }
        Ok(())
    }

    pub fn remove_user(&mut self, group: &str, name: &str) {
        if let Some(g) = self.groups.get_mut(group) {
            g.members.remove(name);
        }
    }

    /// Every group `(name, tripcode)` belongs to, honoring the
    /// empty-tripcode-list "accept any" rule.
    pub fn user_groups(&self, name: &str, tripcode: &str) -> impl Iterator<Item = &GroupState> + '_ {
        self.groups.values().filter(move |group| match group.members.get(name) {
            Some(tripcodes) => tripcodes.is_empty() || tripcodes.iter().any(|t| t == tripcode),
            None => false,
        })
    }

    /// §8 property 7: admin short-circuits; otherwise the minimum permit
    /// across every group containing the user, default `user`.
    pub fn user_permit(&self, name: &str, tripcode: &str, is_admin: bool) -> i64 {
        if is_admin {
            return self.permits["admin"];
        }
        let mut permit = self.permits["user"];
        for group in self.user_groups(name, tripcode) {
            if let Some(&group_permit) = self.permits.get(&group.permit) {
                permit = permit.min(group_permit);
            }
        }
        permit
    }

    pub fn check_permit(&self, group: &str, name: &str, tripcode: &str, is_admin: bool) -> Result<bool, GroupsError> {
        let required = self.permits[&self.get_group(group)?.permit];
        Ok(self.user_permit(name, tripcode, is_admin) <= required)
    }

    /// Resolves a raw permit name (`spec.permit`/`flag.permit`, e.g.
    /// `"moder"`) to its numeric level, for comparison against a caller's
    /// effective permit (§4.6 Authorization).
    pub fn permit_level(&self, permit_name: &str) -> Option<i64> {
        self.permits.get(permit_name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with_dj_group() -> GroupsManager {
        let mut groups = HashMap::new();
        groups.insert(
            "djs".to_string(),
            GroupState {
                permit: "dj".to_string(),
                require_tripcode: true,
                members: HashMap::from([("alice".to_string(), vec!["abc".to_string()])]),
            },
        );
        GroupsManager::new(groups, default_permits())
    }

    #[test]
    fn admin_short_circuits_to_admin_permit() {
        let manager = manager_with_dj_group();
        assert_eq!(manager.user_permit("anyone", "", true), 0);
    }

    #[test]
    fn non_member_falls_back_to_user_permit() {
        let manager = manager_with_dj_group();
        assert_eq!(manager.user_permit("bob", "", false), 100);
    }

    #[test]
    fn member_gets_minimum_of_memberships() {
        let manager = manager_with_dj_group();
        assert_eq!(manager.user_permit("alice", "abc", false), 50);
    }

    #[test]
    fn empty_tripcode_list_accepts_any_tripcode() {
        let mut groups = HashMap::new();
        groups.insert(
            "everyone".to_string(),
            GroupState { permit: "moder".to_string(), require_tripcode: false, members: HashMap::new() },
        );
        let mut manager = GroupsManager::new(groups, default_permits());
        manager.add_user("everyone", "carol", None).unwrap();
        assert_eq!(manager.user_permit("carol", "whatever", false), 1);
    }

    #[test]
    fn add_user_requires_tripcode_when_group_demands_it() {
        let mut manager = manager_with_dj_group();
        let err = manager.add_user("djs", "dave", None).unwrap_err();
        assert!(matches!(err, GroupsError::TripcodeRequired(_, _)));
    }
}
