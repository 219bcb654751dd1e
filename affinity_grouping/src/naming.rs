//! Naming the groups.
//!
//! Names come from an external collaborator (typically a text generation
//! service) that receives the initials of the members. The collaborator may
//! be missing, slow or broken: in all these cases the group is named after
//! the concatenated initials, so that a group always has a non-empty name.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use snafu::Snafu;

use crate::config::NameSource;

/// Name used when no member has a known first name.
pub const UNNAMED_GROUP: &str = "Unnamed Group";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum NamingError {
    #[snafu(display("no naming service is configured"))]
    Unconfigured,
    #[snafu(display("the naming service did not answer within {timeout:?}"))]
    TimedOut { timeout: Duration },
    #[snafu(display("the naming service failed: {message}"))]
    ServiceFailed { message: String },
    #[snafu(display("the naming service returned an empty name"))]
    EmptyName,
}

pub trait GroupNamer: Send + Sync {
    /// Proposes a name for a group, given the uppercase initials of its members.
    fn name_group(&self, initials: &[String]) -> Result<String, NamingError>;
}

/// The uppercase first letter of each non-empty first name.
pub fn initials(first_names: &[String]) -> Vec<String> {
    first_names
        .iter()
        .filter_map(|n| n.trim().chars().next())
        .map(|c| c.to_uppercase().collect::<String>())
        .collect()
}

pub fn fallback_name(initials: &[String]) -> String {
    let joined: String = initials.concat();
    if joined.is_empty() {
        UNNAMED_GROUP.to_string()
    } else {
        joined
    }
}

/// Calls the namer on a separate thread and waits at most `timeout` for the answer.
///
/// A namer that does not answer in time keeps running in the background;
/// its answer is discarded. Namers are expected to bound their own calls,
/// for instance with a client timeout.
pub fn name_with_timeout(
    namer: &Arc<dyn GroupNamer>,
    initials: &[String],
    timeout: Duration,
) -> Result<String, NamingError> {
    let (tx, rx) = mpsc::channel();
    let namer = Arc::clone(namer);
    let request = initials.to_vec();
    thread::spawn(move || {
        let res = namer.name_group(&request);
        // The receiver is gone if we already timed out.
        let _ = tx.send(res);
    });
    match rx.recv_timeout(timeout) {
        Ok(res) => {
            let name = res?;
            let name = name.trim();
            if name.is_empty() {
                EmptyNameSnafu.fail()
            } else {
                Ok(name.to_string())
            }
        }
        Err(mpsc::RecvTimeoutError::Timeout) => TimedOutSnafu { timeout }.fail(),
        Err(mpsc::RecvTimeoutError::Disconnected) => ServiceFailedSnafu {
            message: "the naming thread stopped without answering",
        }
        .fail(),
    }
}

/// Names a group from the first names of its members, through the namer if
/// there is one, or with the initials otherwise.
pub fn choose_group_name(
    namer: Option<&Arc<dyn GroupNamer>>,
    first_names: &[String],
    timeout: Duration,
) -> (String, NameSource) {
    let inits = initials(first_names);
    if inits.is_empty() {
        return (UNNAMED_GROUP.to_string(), NameSource::InitialsFallback);
    }
    let res = match namer {
        Some(n) => name_with_timeout(n, &inits, timeout),
        None => UnconfiguredSnafu.fail(),
    };
    match res {
        Ok(name) => {
            debug!("choose_group_name: {:?} -> {:?}", inits, name);
            (name, NameSource::Collaborator)
        }
        Err(NamingError::Unconfigured) => (fallback_name(&inits), NameSource::InitialsFallback),
        Err(e) => {
            warn!(
                "choose_group_name: falling back to initials {:?}: {}",
                inits, e
            );
            (fallback_name(&inits), NameSource::InitialsFallback)
        }
    }
}
