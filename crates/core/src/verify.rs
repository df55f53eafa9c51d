//! Verification assertions.
//!
//! Pure comparisons between expected and observed daemon state. Each check
//! returns an [`AssertionFailure`] carrying what was expected and what was
//! seen, so a failing run can print the comparison.

use std::fmt;

use once_cell::sync::Lazy;
use regex_lite::Regex;
use thiserror::Error;

use crate::config::{TicketMode, VersionMode};
use crate::core_client::{App, AppKey, AppStatus, Instance, InstanceStatus, JobResult};
use crate::poller::JobOutcome;

const MAX_APP_NAME_LEN: usize = 128;

/// Lowercase TLD, then at least two `[a-z0-9-]` segments not starting or ending with `-`.
static APP_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z]+(?:\.[a-z0-9](?:[a-z0-9-]*[a-z0-9])?){2,}$").unwrap()
});

/// A post-condition that did not hold.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{check}: expected {expected}, got {actual}")]
pub struct AssertionFailure {
    pub check: String,
    pub expected: String,
    pub actual: String,
}

impl AssertionFailure {
    pub fn new(
        check: impl Into<String>,
        expected: impl fmt::Display,
        actual: impl fmt::Display,
    ) -> Self {
        Self {
            check: check.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

type Check = Result<(), AssertionFailure>;

fn matching<'a>(apps: &'a [App], key: &'a AppKey) -> impl Iterator<Item = &'a App> + 'a {
    apps.iter().filter(move |app| &app.app_key == key)
}

fn named<'a>(apps: &'a [App], name: &'a str) -> impl Iterator<Item = &'a App> + 'a {
    apps.iter().filter(move |app| app.app_key.name == name)
}

fn list_keys(apps: &[App]) -> String {
    let keys: Vec<String> = apps.iter().map(|a| a.app_key.to_string()).collect();
    format!("[{}]", keys.join(", "))
}

/// Whether `name` has the reverse-domain form the daemon accepts.
pub fn is_valid_app_name(name: &str) -> bool {
    name.len() <= MAX_APP_NAME_LEN && APP_NAME.is_match(name)
}

pub fn assert_app_count(apps: &[App], expected: usize) -> Check {
    if apps.len() == expected {
        Ok(())
    } else {
        Err(AssertionFailure::new(
            "installed app count",
            expected,
            format!("{} {}", apps.len(), list_keys(apps)),
        ))
    }
}

/// `after` must be exactly `removed` entries shorter than `before`.
pub fn assert_app_count_shrank(before: &[App], after: &[App], removed: usize) -> Check {
    let expected = before.len().saturating_sub(removed);
    if before.len() >= removed && after.len() == expected {
        Ok(())
    } else {
        Err(AssertionFailure::new(
            "installed app count after uninstall",
            format!("{} ({} - {})", expected, before.len(), removed),
            format!("{} {}", after.len(), list_keys(after)),
        ))
    }
}

/// Every key in `expected` is listed.
pub fn assert_apps_present(apps: &[App], expected: &[AppKey]) -> Check {
    let missing: Vec<String> = expected
        .iter()
        .filter(|key| matching(apps, key).next().is_none())
        .map(ToString::to_string)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AssertionFailure::new(
            "apps installed",
            format!("present: [{}]", missing.join(", ")),
            list_keys(apps),
        ))
    }
}

/// None of the keys in `removed` is listed.
pub fn assert_apps_absent(apps: &[App], removed: &[AppKey]) -> Check {
    let remaining: Vec<String> = removed
        .iter()
        .filter(|key| matching(apps, key).next().is_some())
        .map(ToString::to_string)
        .collect();
    if remaining.is_empty() {
        Ok(())
    } else {
        Err(AssertionFailure::new(
            "apps uninstalled",
            "none of the uninstalled apps listed",
            format!("still listed: [{}]", remaining.join(", ")),
        ))
    }
}

/// Exactly one entry for `key`, with status `installed`.
pub fn assert_app_installed_once(apps: &[App], key: &AppKey) -> Check {
    let found: Vec<&App> = matching(apps, key).collect();
    match found.as_slice() {
        [app] if app.status == AppStatus::Installed => Ok(()),
        [app] => Err(AssertionFailure::new(
            format!("status of {}", key),
            AppStatus::Installed,
            &app.status,
        )),
        _ => Err(AssertionFailure::new(
            format!("entries for {}", key),
            1,
            found.len(),
        )),
    }
}

/// Exactly one entry named `name` (any version), with status `installed`.
pub fn assert_app_name_installed_once(apps: &[App], name: &str) -> Check {
    let found: Vec<&App> = named(apps, name).collect();
    match found.as_slice() {
        [app] if app.status == AppStatus::Installed => Ok(()),
        [app] => Err(AssertionFailure::new(
            format!("status of {}", name),
            AppStatus::Installed,
            &app.status,
        )),
        _ => Err(AssertionFailure::new(
            format!("entries named {}", name),
            1,
            found.len(),
        )),
    }
}

pub fn assert_instance_status(
    instances: &[Instance],
    instance_id: &str,
    expected: &InstanceStatus,
) -> Check {
    match instances.iter().find(|i| i.instance_id == instance_id) {
        Some(instance) if &instance.status == expected => Ok(()),
        Some(instance) => Err(AssertionFailure::new(
            format!("status of instance {}", instance_id),
            expected,
            &instance.status,
        )),
        None => Err(AssertionFailure::new(
            format!("instance {}", instance_id),
            "listed",
            "not listed",
        )),
    }
}

/// The app named `name` has exactly one instance and it is running.
pub fn assert_single_running_instance(instances: &[Instance], name: &str) -> Check {
    let found: Vec<&Instance> = instances
        .iter()
        .filter(|i| i.app_key.name == name)
        .collect();
    match found.as_slice() {
        [instance] if instance.status == InstanceStatus::Running => Ok(()),
        [instance] => Err(AssertionFailure::new(
            format!("status of the {} instance", name),
            InstanceStatus::Running,
            &instance.status,
        )),
        _ => Err(AssertionFailure::new(
            format!("instances of {}", name),
            1,
            found.len(),
        )),
    }
}

pub fn assert_enough_tickets(available: usize, needed: usize) -> Check {
    if available >= needed {
        Ok(())
    } else {
        Err(AssertionFailure::new(
            "unused tickets",
            format!("at least {}", needed),
            available,
        ))
    }
}

/// Tickets consumed between two counts, checked against the batch size.
///
/// The count never increasing holds in both modes.
pub fn assert_ticket_delta(before: usize, after: usize, batch: usize, mode: TicketMode) -> Check {
    if after > before {
        return Err(AssertionFailure::new(
            "unused ticket count",
            format!("at most {}", before),
            after,
        ));
    }
    let consumed = before - after;
    let holds = match mode {
        TicketMode::Exact => consumed == batch,
        TicketMode::AtLeast => consumed >= batch,
    };
    if holds {
        Ok(())
    } else {
        let expected = match mode {
            TicketMode::Exact => batch.to_string(),
            TicketMode::AtLeast => format!("at least {}", batch),
        };
        Err(AssertionFailure::new("tickets consumed", expected, consumed))
    }
}

/// Compare the installed core version with the published one.
///
/// In structural mode `X.Y.Z-release` must match the first two fields of
/// `X.Y.Z-release-shorthash`, the hash being 7 lowercase hex characters.
pub fn assert_version(published: &str, installed: &str, mode: VersionMode) -> Check {
    if mode == VersionMode::Exact {
        return if published == installed {
            Ok(())
        } else {
            Err(AssertionFailure::new("core version", published, installed))
        };
    }

    let published_fields: Vec<&str> = published.split('-').collect();
    let installed_fields: Vec<&str> = installed.split('-').collect();

    if published_fields.len() != 2 {
        return Err(AssertionFailure::new(
            format!("fields in published version {:?}", published),
            2,
            published_fields.len(),
        ));
    }
    if installed_fields.len() != 3 {
        return Err(AssertionFailure::new(
            format!("fields in installed version {:?}", installed),
            3,
            installed_fields.len(),
        ));
    }
    if published_fields[..2] != installed_fields[..2] {
        return Err(AssertionFailure::new(
            "core version and release name",
            published,
            format!("{}-{}", installed_fields[0], installed_fields[1]),
        ));
    }

    let hash = installed_fields[2];
    let is_short_hash =
        hash.len() == 7 && hash.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'));
    if !is_short_hash {
        return Err(AssertionFailure::new(
            "commit hash of installed version",
            "7 lowercase hex characters",
            format!("{:?}", hash),
        ));
    }
    Ok(())
}

/// Only `successful` lets a dependent step run.
pub fn assert_job_successful(what: &str, outcome: &JobOutcome) -> Check {
    if outcome.is_successful() {
        Ok(())
    } else {
        Err(AssertionFailure::new(
            format!("{} job {}", what, outcome.job_id),
            "successful",
            format!("{} ({})", outcome.status, outcome.result),
        ))
    }
}

pub fn assert_result_code(what: &str, result: &JobResult, expected: i32) -> Check {
    if result.code == expected {
        Ok(())
    } else {
        Err(AssertionFailure::new(
            format!("{} result code", what),
            expected,
            result,
        ))
    }
}
