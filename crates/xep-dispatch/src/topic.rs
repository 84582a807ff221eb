/// Fixed routing channels of the bus.
///
/// Discriminants are the message tags seen in diagnostics and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Topic {
    /// Debug and trace output
    DebugAndTrace = 0,
    /// Replies routed back to a sender
    Reply = 1,
    /// Packets received on the primary host link
    HostComRx = 2,
    /// Messages to transmit on the primary host link
    HostComSend = 3,
    /// Frames produced by the radar task
    RadarData = 4,
    /// Packets received on the debug link
    HostComRxDebug = 5,
    /// Messages to transmit on the debug link
    HostComSendDebug = 6,
}

impl Topic {
    /// Number of topics.
    pub const COUNT: usize = 7;

    /// All topics in tag order.
    pub const ALL: [Topic; Self::COUNT] = [
        Topic::DebugAndTrace,
        Topic::Reply,
        Topic::HostComRx,
        Topic::HostComSend,
        Topic::RadarData,
        Topic::HostComRxDebug,
        Topic::HostComSendDebug,
    ];

    /// Index into per-topic tables.
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Topic for a numeric tag.
    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(usize::from(tag)).copied()
    }

    /// The send topic paired with a receive topic.
    ///
    /// Commands arriving on a link are answered on the same link.
    #[must_use]
    pub fn reply_route(self) -> Self {
        match self {
            Topic::HostComRxDebug | Topic::HostComSendDebug => Topic::HostComSendDebug,
            _ => Topic::HostComSend,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_round_trip() {
        for topic in Topic::ALL {
            assert_eq!(Topic::from_tag(topic as u8), Some(topic));
        }
        assert_eq!(Topic::from_tag(7), None);
    }

    #[test]
    fn test_reply_route() {
        assert_eq!(Topic::HostComRx.reply_route(), Topic::HostComSend);
        assert_eq!(Topic::HostComRxDebug.reply_route(), Topic::HostComSendDebug);
    }
}
