pub(crate) mod attempt_gateway;
pub(crate) mod attempt_session;
pub(crate) mod countdown;
pub(crate) mod security_monitor;
pub(crate) mod tab_coordinator;
