use super::HubError;
use super::logging;

#[test]
fn logging_init_accepts_levels() {
    // try_init makes repeated calls harmless
    logging::init("info");
    logging::init("debug");
    logging::init("warn");
}

#[test]
fn parse_level_falls_back_to_info() {
    assert_eq!(logging::parse_level("WARNING"), tracing::Level::WARN);
    assert_eq!(logging::parse_level(" trace "), tracing::Level::TRACE);
    assert_eq!(logging::parse_level("verbose"), tracing::Level::INFO);
}

#[test]
fn error_messages_are_readable() {
    let err = HubError::TooManyConnections { limit: 3 };
    assert_eq!(err.to_string(), "connection limit of 3 reached");
    assert_eq!(HubError::HubClosed.to_string(), "hub is shut down");
}
