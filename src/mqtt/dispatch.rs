//! Inbound payload parsing and command dispatch.
//!
//! Grounded on `original_source/common/appInit.c`'s `getParamValue` clamp
//! helper and the tokenizer implied throughout the task sources: payloads
//! are `<command> <param1> <param2> …` split on any of `' '`, `','`, `':'`.

use tracing::warn;

use crate::error::DispatchError;

use super::message::SubscriptionRegistry;

/// Splits a payload into tokens on `{' ', ',', ':'}`, dropping empty tokens
/// produced by adjacent delimiters.
pub fn parse_params(payload: &str) -> Vec<String> {
    payload
        .split([' ', ',', ':'])
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Reads `params[index]` as an integer, clamped to `[lo, hi]`; returns
/// `default` if the index is out of range or the token doesn't parse.
pub fn get_param_value(params: &[String], index: usize, lo: i64, hi: i64, default: i64) -> i64 {
    let raw = match params.get(index) {
        Some(raw) => raw,
        None => return default,
    };
    match raw.parse::<i64>() {
        Ok(v) => v.clamp(lo, hi),
        Err(_) => default,
    }
}

/// Resolves `topic`/`payload` against `registry` and invokes the matching
/// handler with the parsed parameter list (the parameters after the command
/// token itself). Unknown topics/commands are logged and dropped, matching
/// spec.md §4.3 "Inbound dispatch".
pub async fn dispatch(
    registry: &SubscriptionRegistry,
    topic: &str,
    payload: &str,
) -> Result<(), DispatchError> {
    if payload.is_empty() {
        return Err(DispatchError::EmptyPayload);
    }

    let tokens = parse_params(payload);
    let command = tokens
        .first()
        .cloned()
        .ok_or(DispatchError::EmptyPayload)?;

    match registry.handler(topic, &command).await {
        Some(handler) => {
            handler(&tokens[1..]);
            Ok(())
        }
        None => {
            warn!(topic = %topic, command = %command, "dropping unrecognised command");
            Err(DispatchError::UnknownCommand {
                topic: topic.to_string(),
                command,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::message::{CommandHandler, Subscription};
    use crate::modem::MqttQos;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn parses_mixed_delimiters() {
        assert_eq!(
            parse_params("SET_DWELL_TIME 10000"),
            vec!["SET_DWELL_TIME", "10000"]
        );
        assert_eq!(parse_params("a,b:c d"), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn get_param_value_clamps_and_defaults() {
        let params = parse_params("SET_DWELL_TIME 1000");
        assert_eq!(get_param_value(&params, 1, 5000, 60000, 5000), 5000);
        assert_eq!(get_param_value(&params, 9, 0, 10, 3), 3);
    }

    #[tokio::test]
    async fn dispatches_known_command_and_drops_unknown() {
        let registry = SubscriptionRegistry::new();
        let invoked = Arc::new(AtomicBool::new(false));
        let invoked_clone = invoked.clone();
        let handler: CommandHandler = Arc::new(move |_params| {
            invoked_clone.store(true, Ordering::Relaxed);
        });
        let mut handlers = HashMap::new();
        handlers.insert("EXIT_APP".to_string(), handler);
        registry
            .insert(Subscription {
                topic: "h/i/AppControl".to_string(),
                qos: MqttQos::AtLeastOnce,
                short_name: None,
                handlers,
            })
            .await;

        dispatch(&registry, "h/i/AppControl", "EXIT_APP 0")
            .await
            .unwrap();
        assert!(invoked.load(Ordering::Relaxed));

        let err = dispatch(&registry, "h/i/AppControl", "BOGUS")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownCommand { .. }));
    }
}
