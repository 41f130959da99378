use std::io;
use std::path::PathBuf;

use crate::kernel::error::{Error, Result};
use crate::plugin_system::error::{ErrorList, PluginSystemError};
use crate::storage::error::StorageSystemError;

fn unknown(id: &str) -> PluginSystemError {
    PluginSystemError::UnknownPlugin {
        plugin_id: id.to_string(),
        referenced_by: None,
    }
}

#[test]
fn test_conversions() {
    let err: Error = unknown("alpha").into();
    assert!(matches!(err, Error::PluginSystem(PluginSystemError::UnknownPlugin { .. })));

    let err: Error = StorageSystemError::UnsupportedConfigFormat("x.ini".to_string()).into();
    assert!(matches!(err, Error::StorageSystem(_)));

    let err: Error = StorageSystemError::io(
        io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        "read_state",
        PathBuf::from("/state/active-plugins"),
    )
    .into();
    let message = err.to_string();
    assert!(message.contains("read_state"));
    assert!(message.contains("/state/active-plugins"));
}

#[test]
fn test_error_list_display_and_leaves() {
    let mut inner = ErrorList::new();
    inner.push(unknown("b"));
    inner.push(PluginSystemError::CyclicDependency {
        chain: vec!["a".to_string(), "c".to_string(), "a".to_string()],
    });
    let mut errors = ErrorList::from(unknown("x"));
    errors.push(PluginSystemError::nested("Couldn't activate plugin 'a'", inner));

    assert_eq!(errors.len(), 2);
    assert_eq!(errors.leaves().len(), 3);
    let err = Error::from(errors);
    let message = err.to_string();
    assert!(message.starts_with("2 plugin error(s):"), "{}", message);
    assert!(message.contains("Unknown plugin 'x'"));
    assert!(message.contains("Circular dependency detected: a -> c -> a"));
}

#[test]
fn test_question_mark_propagation() {
    fn scan() -> Result<()> {
        ErrorList::new().into_result()?;
        ErrorList::from(unknown("late")).into_result()?;
        Ok(())
    }
    assert!(matches!(scan(), Err(Error::Plugins(list)) if list.len() == 1));
}
