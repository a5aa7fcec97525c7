/// Event delivered to a subscriber's [`EventStream`](crate::EventStream).
///
/// `C` is the decoded content type of the configured
/// [`EventDecoder`](crate::decoder::EventDecoder); with the default decoder
/// it is [`StreamContent`](crate::decoder::StreamContent).
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent<C> {
    /// A streaming connection was established and this subscriber's topic
    /// has been (re)subscribed.
    ConnectionUp,

    /// The streaming connection was lost. Events published while down are
    /// not replayed.
    ConnectionDown,

    /// An event for this subscriber's topic.
    ReceivedEvent(C),
}

impl<C> StreamEvent<C> {
    /// Returns the content of a `ReceivedEvent`.
    pub fn content(&self) -> Option<&C> {
        match self {
            StreamEvent::ReceivedEvent(content) => Some(content),
            _ => None,
        }
    }

    pub fn into_content(self) -> Option<C> {
        match self {
            StreamEvent::ReceivedEvent(content) => Some(content),
            _ => None,
        }
    }

    pub fn is_connection_up(&self) -> bool {
        matches!(self, StreamEvent::ConnectionUp)
    }

    pub fn is_connection_down(&self) -> bool {
        matches!(self, StreamEvent::ConnectionDown)
    }
}
