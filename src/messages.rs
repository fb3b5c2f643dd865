//! Payloads exchanged on the greetings route.

/// Who to greet. An empty name greets the session's principal.
#[derive(Clone, PartialEq, prost::Message)]
pub struct GreetingRequest {
    #[prost(string, tag = "1")]
    pub name: String,
}

impl GreetingRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GreetingResponse {
    #[prost(string, tag = "1")]
    pub message: String,
}
