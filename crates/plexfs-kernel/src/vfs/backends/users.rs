//! Host user and group database lookups.

use nix::unistd::{Gid, Group, Uid, User};

use crate::vfs::error::{FsError, FsResult};

fn lookup_failed(e: nix::Error) -> FsError {
    FsError::from_errno(e as i32, "user database")
}

/// Resolve a user name or numeric id.
pub(crate) fn user_id(user: &str) -> FsResult<u32> {
    if let Ok(uid) = user.parse() {
        return Ok(uid);
    }
    if user.contains('\0') {
        return Err(FsError::InvalidUser(user.to_string()));
    }
    User::from_name(user)
        .map_err(lookup_failed)?
        .map(|u| u.uid.as_raw())
        .ok_or_else(|| FsError::InvalidUser(user.to_string()))
}

/// Resolve a group name or numeric id.
pub(crate) fn group_id(group: &str) -> FsResult<u32> {
    if let Ok(gid) = group.parse() {
        return Ok(gid);
    }
    if group.contains('\0') {
        return Err(FsError::InvalidGroup(group.to_string()));
    }
    Group::from_name(group)
        .map_err(lookup_failed)?
        .map(|g| g.gid.as_raw())
        .ok_or_else(|| FsError::InvalidGroup(group.to_string()))
}

/// User name for `uid`, or the number itself when it has no entry.
pub(crate) fn user_name(uid: u32) -> String {
    match User::from_uid(Uid::from_raw(uid)) {
        Ok(Some(user)) => user.name,
        _ => uid.to_string(),
    }
}

/// Group name for `gid`, or the number itself when it has no entry.
pub(crate) fn group_name(gid: u32) -> String {
    match Group::from_gid(Gid::from_raw(gid)) {
        Ok(Some(group)) => group.name,
        _ => gid.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_ids_pass_through() {
        assert_eq!(user_id("1234").unwrap(), 1234);
        assert_eq!(group_id("0").unwrap(), 0);
    }

    #[test]
    fn test_root_round_trip() {
        assert_eq!(user_id("root").unwrap(), 0);
        assert_eq!(user_name(0), "root");
    }

    #[test]
    fn test_unknown_names() {
        assert!(matches!(
            user_id("plexfs-no-such-user"),
            Err(FsError::InvalidUser(_))
        ));
        assert!(matches!(
            group_id("plexfs-no-such-group"),
            Err(FsError::InvalidGroup(_))
        ));
        assert!(matches!(user_id("nul\0byte"), Err(FsError::InvalidUser(_))));
    }

    #[test]
    fn test_unmapped_id_falls_back_to_number() {
        assert_eq!(group_name(3_999_999_999), "3999999999");
        assert_eq!(user_name(3_999_999_999), "3999999999");
    }

    #[test]
    fn test_root_group_round_trip() {
        let name = group_name(0);
        assert_eq!(group_id(&name).unwrap(), 0);
    }
}
