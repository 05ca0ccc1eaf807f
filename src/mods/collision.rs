//! Folder-name collision handling within a profile

use super::sanitize::{id_token, COLLISION_SEPARATOR};
use crate::state::RepoState;

/// The mod other than `mod_id` whose installation in `profile` uses
/// `folder` (ignoring case), if any.
pub fn folder_owner<'s>(
    state: &'s RepoState,
    mod_id: &str,
    folder: &str,
    profile: &str,
) -> Option<&'s str> {
    state.mods.iter().find_map(|(other_id, record)| {
        if other_id == mod_id {
            return None;
        }
        record
            .installation(profile)
            .filter(|pi| pi.installed && pi.folder.eq_ignore_ascii_case(folder))
            .map(|_| other_id.as_str())
    })
}

/// Pick the folder `mod_id` should install under in `profile`.
///
/// Returns `(folder, collided)`. When another mod already has an installed
/// folder with the same name (ignoring case) in the same profile, the
/// mod's id token is appended after [`COLLISION_SEPARATOR`], then a counter
/// until the name is free. Other profiles are never consulted since only
/// one profile is deployed at a time.
pub fn resolve_folder_collision(
    mod_id: &str,
    desired: &str,
    profile: &str,
    state: &RepoState,
) -> (String, bool) {
    let Some(other) = folder_owner(state, mod_id, desired, profile) else {
        return (desired.to_string(), false);
    };

    let base = format!("{}{}{}", desired, COLLISION_SEPARATOR, id_token(mod_id));
    let mut folder = base.clone();
    let mut n = 2;
    while folder_owner(state, mod_id, &folder, profile).is_some() {
        folder = format!("{}-{}", base, n);
        n += 1;
    }

    tracing::info!(
        "Folder '{}' already used by '{}' in profile '{}', using '{}'",
        desired,
        other,
        profile,
        folder
    );
    (folder, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ModRecord, Origin, ProfileInstallation};

    fn with_install(state: &mut RepoState, id: &str, profile: &str, folder: &str) {
        let record = state
            .mods
            .entry(id.to_string())
            .or_insert_with(|| ModRecord::new(Origin::Local(format!("{id}.zip")), id));
        record.installations.insert(
            profile.to_string(),
            ProfileInstallation {
                installed: true,
                enabled: true,
                folder: folder.to_string(),
                ..ProfileInstallation::default()
            },
        );
    }

    #[test]
    fn same_profile_clash_gets_suffix() {
        let mut state = RepoState::new();
        with_install(&mut state, "first", "default", "foo");

        let (folder, collided) = resolve_folder_collision("second", "Foo", "default", &state);
        assert!(collided);
        assert_eq!(folder, "Foo__second");
        assert_ne!(folder.to_lowercase(), "foo");
    }

    #[test]
    fn other_profiles_do_not_collide() {
        let mut state = RepoState::new();
        with_install(&mut state, "first", "alt", "Foo");

        assert_eq!(
            resolve_folder_collision("second", "Foo", "default", &state),
            ("Foo".to_string(), false)
        );
        assert_eq!(
            resolve_folder_collision("first", "Foo", "alt", &state),
            ("Foo".to_string(), false)
        );
    }

    #[test]
    fn uninstalled_records_do_not_collide() {
        let mut state = RepoState::new();
        with_install(&mut state, "first", "default", "foo");
        if let Some(pi) = state
            .mods
            .get_mut("first")
            .and_then(|r| r.installations.get_mut("default"))
        {
            pi.installed = false;
        }

        let (_, collided) = resolve_folder_collision("second", "foo", "default", &state);
        assert!(!collided);
    }

    #[test]
    fn suffix_is_bounded_for_long_ids() {
        let mut state = RepoState::new();
        with_install(&mut state, "first", "default", "foo");
        let long_id = "x".repeat(200);

        let (folder, collided) = resolve_folder_collision(&long_id, "foo", "default", &state);
        assert!(collided);
        assert!(folder.len() <= "foo__".len() + 32);
        assert_eq!(folder, resolve_folder_collision(&long_id, "foo", "default", &state).0);
    }

    #[test]
    fn suffixed_name_never_lands_on_another_installed_folder() {
        let mut state = RepoState::new();
        with_install(&mut state, "c", "default", "foo");
        with_install(&mut state, "x", "default", "foo-b");
        with_install(&mut state, "y", "default", "foo__b");
        with_install(&mut state, "z", "default", "FOO__B-2");

        let (folder, collided) = resolve_folder_collision("b", "foo", "default", &state);
        assert!(collided);
        assert_eq!(folder, "foo__b-3");
        for (id, _, pi) in state.installations() {
            assert!(
                !pi.folder.eq_ignore_ascii_case(&folder),
                "'{folder}' clashes with the folder of '{id}'"
            );
        }
    }

    #[test]
    fn folder_owner_ignores_self_and_case() {
        let mut state = RepoState::new();
        with_install(&mut state, "a", "default", "Foo");
        assert_eq!(folder_owner(&state, "b", "foo", "default"), Some("a"));
        assert_eq!(folder_owner(&state, "a", "foo", "default"), None);
        assert_eq!(folder_owner(&state, "b", "foo", "alt"), None);
    }
}
