use biometrics::{Collector, Counter, Moments};

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("incibot.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter = Counter::new("incibot.client.request_errors");
pub(crate) static CLIENT_REQUEST_DURATION: Moments =
    Moments::new("incibot.client.request_duration_seconds");

pub(crate) static STREAM_FRAGMENTS: Counter = Counter::new("incibot.stream.fragments");
pub(crate) static STREAM_ERRORS: Counter = Counter::new("incibot.stream.errors");
pub(crate) static STREAM_BYTES: Counter = Counter::new("incibot.stream.bytes");

pub(crate) static RESPONDER_GENERATIONS: Counter = Counter::new("incibot.responder.generations");
pub(crate) static RESPONDER_FAILURES: Counter = Counter::new("incibot.responder.failures");

pub(crate) static SESSION_TURNS: Counter = Counter::new("incibot.session.turns");
pub(crate) static SESSION_PARTIAL_TURNS: Counter = Counter::new("incibot.session.partial_turns");
pub(crate) static SESSION_TURN_DURATION: Moments =
    Moments::new("incibot.session.turn_duration_seconds");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_moments(&CLIENT_REQUEST_DURATION);

    collector.register_counter(&STREAM_FRAGMENTS);
    collector.register_counter(&STREAM_ERRORS);
    collector.register_counter(&STREAM_BYTES);

    collector.register_counter(&RESPONDER_GENERATIONS);
    collector.register_counter(&RESPONDER_FAILURES);

    collector.register_counter(&SESSION_TURNS);
    collector.register_counter(&SESSION_PARTIAL_TURNS);
    collector.register_moments(&SESSION_TURN_DURATION);
}
