//! Controller-side error descriptions
//!
//! After a failed call the controller usually explains itself through the
//! `@ERROR_DESCRIPTION` variable. Reading it is best-effort: any failure here
//! is logged and swallowed so it can never mask the error being reported.

use tracing::{error, warn};
use crate::transport::{RemoteHandle, RemoteTransport, TransportResult};
use crate::variable::Value;

pub const ERROR_DESCRIPTION_VARIABLE: &str = "@ERROR_DESCRIPTION";

/// Read `@ERROR_DESCRIPTION` from the controller, if there is one to read.
pub fn read_error_description(
    transport: &dyn RemoteTransport,
    controller: Option<RemoteHandle>,
) -> Option<String> {
    let Some(controller) = controller else {
        warn!("No controller handle for error description");
        return None;
    };

    match fetch_description(transport, controller) {
        Ok(Some(description)) => {
            error!("RC8 {}: {}", ERROR_DESCRIPTION_VARIABLE, description);
            Some(description)
        }
        Ok(None) => {
            warn!("No {} from controller", ERROR_DESCRIPTION_VARIABLE);
            None
        }
        Err(e) => {
            warn!("Error while reading {}: {}", ERROR_DESCRIPTION_VARIABLE, e);
            None
        }
    }
}

fn fetch_description(
    transport: &dyn RemoteTransport,
    controller: RemoteHandle,
) -> TransportResult<Option<String>> {
    let handle = transport.open_variable(controller, ERROR_DESCRIPTION_VARIABLE)?;
    let value = transport.get_value(handle);
    if let Err(e) = transport.release_handle(handle) {
        warn!("Failed to release {} handle: {}", ERROR_DESCRIPTION_VARIABLE, e);
    }

    Ok(match value? {
        Value::Text(text) if !text.trim().is_empty() => Some(text),
        Value::Text(_) => None,
        other => Some(other.to_string()),
    })
}

/// Append a controller description to an error message
pub fn enrich_message(message: &str, description: Option<&str>) -> String {
    match description {
        Some(description) => format!("{} - controller: {}", message, description),
        None => message.to_string(),
    }
}
