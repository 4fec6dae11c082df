use tracing::Span;

/// Span attached to every task spawned for one call.
///
/// Log lines emitted inside carry `component` and `call_id`, so a single call
/// can be followed across the signaling, media and conversation tasks.
pub fn call_span(component: &'static str, call_id: &str) -> Span {
    tracing::info_span!("call", component, call_id = %call_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_without_subscriber_is_disabled() {
        let span = call_span("media", "abc@host");
        // No subscriber installed in unit tests
        assert!(span.is_disabled());
    }
}
