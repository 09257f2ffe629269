//! Key construction for the per-user virtual filesystem.
//!
//! Every key a user owns starts with `<user_id>/`. Files live at
//! `<user_id>/[<folder>/]<token>_<name>`, folder markers at
//! `<user_id>/<folder>/`. Folders are otherwise implied by key prefixes.

use crate::services::object_store::MAX_OBJECT_KEY_LEN;
use thiserror::Error;

pub const DELIMITER: &str = "/";

/// Length of the hyphenated UUID token placed in front of uploaded file names.
const UPLOAD_TOKEN_LEN: usize = 36;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("{what} `{value}` contains an empty, `.` or `..` segment")]
    BadSegment { what: &'static str, value: String },
    #[error("{what} `{value}` must not contain `/`")]
    Nested { what: &'static str, value: String },
    #[error("{what} `{value}` contains a forbidden character")]
    ForbiddenChar { what: &'static str, value: String },
    #[error("key `{0}` is outside the user's namespace")]
    ForeignKey(String),
    #[error("key for `{name}` would be {len} bytes, over the {max} byte limit")]
    TooLong { name: String, len: usize, max: usize },
}

/// Treat `Some("")` the same as no folder at all.
pub fn normalize_folder(folder: Option<&str>) -> Option<&str> {
    folder.filter(|f| !f.is_empty())
}

pub fn user_prefix(user_id: &str) -> String {
    format!("{user_id}{DELIMITER}")
}

/// `<user>/` for the root, `<user>/<folder>/` otherwise.
pub fn folder_prefix(user_id: &str, folder: Option<&str>) -> String {
    match normalize_folder(folder) {
        Some(folder) => format!("{user_id}{DELIMITER}{folder}{DELIMITER}"),
        None => user_prefix(user_id),
    }
}

/// Full virtual path of `name` inside `parent`.
pub fn join_folder(parent: Option<&str>, name: &str) -> String {
    match normalize_folder(parent) {
        Some(parent) => format!("{parent}{DELIMITER}{name}"),
        None => name.to_string(),
    }
}

pub fn file_key(user_id: &str, folder: Option<&str>, token: &str, file_name: &str) -> String {
    format!("{}{token}_{file_name}", folder_prefix(user_id, folder))
}

/// Length in bytes of the key [`file_key`] builds, whatever token is drawn.
pub fn file_key_len(user_id: &str, folder: Option<&str>, file_name: &str) -> usize {
    folder_prefix(user_id, folder).len() + UPLOAD_TOKEN_LEN + 1 + file_name.len()
}

/// Reject a key the object store would refuse for its length.
pub fn check_key_len(name: &str, len: usize) -> Result<(), PathError> {
    if len > MAX_OBJECT_KEY_LEN {
        return Err(PathError::TooLong {
            name: name.to_string(),
            len,
            max: MAX_OBJECT_KEY_LEN,
        });
    }
    Ok(())
}

/// Name shown for a file: everything after the last `/` of its key.
pub fn display_name(key: &str) -> &str {
    key.rsplit_once(DELIMITER).map_or(key, |(_, name)| name)
}

/// The name originally uploaded, with the `<uuid>_` token removed when present.
pub fn original_name(display: &str) -> &str {
    match display.split_at_checked(UPLOAD_TOKEN_LEN) {
        Some((token, rest)) if is_upload_token(token) => {
            rest.strip_prefix('_').unwrap_or(display)
        }
        _ => display,
    }
}

fn is_upload_token(candidate: &str) -> bool {
    uuid::Uuid::try_parse(candidate).is_ok()
}

/// Name of a direct child folder given the listed `prefix` and one of its
/// common prefixes, e.g. `u1/docs/` + `u1/docs/sub/` gives `sub`.
pub fn child_folder_name<'a>(prefix: &str, common_prefix: &'a str) -> Option<&'a str> {
    let name = common_prefix.strip_prefix(prefix)?;
    let name = name.strip_suffix(DELIMITER).unwrap_or(name);
    (!name.is_empty() && !name.contains(DELIMITER)).then_some(name)
}

fn has_forbidden_char(value: &str) -> bool {
    value.chars().any(|c| c.is_control() || c == '\\')
}

/// A single path component: a user id, folder name or file name.
pub fn validate_name(what: &'static str, value: &str) -> Result<(), PathError> {
    if value.is_empty() {
        return Err(PathError::Empty(what));
    }
    if value.contains(DELIMITER) {
        return Err(PathError::Nested {
            what,
            value: value.to_string(),
        });
    }
    if value == "." || value == ".." {
        return Err(PathError::BadSegment {
            what,
            value: value.to_string(),
        });
    }
    if has_forbidden_char(value) {
        return Err(PathError::ForbiddenChar {
            what,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// A `/`-joined folder path. The empty string is the user's root.
pub fn validate_folder_path(what: &'static str, value: &str) -> Result<(), PathError> {
    if value.is_empty() {
        return Ok(());
    }
    if value
        .split(DELIMITER)
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(PathError::BadSegment {
            what,
            value: value.to_string(),
        });
    }
    if has_forbidden_char(value) {
        return Err(PathError::ForbiddenChar {
            what,
            value: value.to_string(),
        });
    }
    Ok(())
}
