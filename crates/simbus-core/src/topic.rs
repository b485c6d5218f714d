//! Client identity, subjects, and destination policies.
//!
//! Every topic has the shape
//! `<namespace…>.<app>.<group>.<client>.<subject…>`. The first four parts
//! come from a [`ClientIdentifier`] (either the publisher's own, or the one a
//! [`Destination`] selects); the rest is a [`Subject`].
//!
//! Segments are validated the same way everywhere: non-empty, at most
//! [`MAX_SEGMENT_LENGTH`] bytes, and limited to alphanumerics, `-` and `_`.
//! That keeps the separator and transport wildcards (`+`, `#`, `*`) out of
//! segment text.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{BROADCAST_SEGMENT, MAX_SEGMENT_LENGTH, TOPIC_SEPARATOR};
use crate::errors::ValidationError;

/// Check a single topic segment.
pub fn validate_segment(segment: &str, position: usize) -> Result<(), ValidationError> {
    if segment.is_empty() {
        return Err(ValidationError::EmptySegment { position });
    }
    if segment.len() > MAX_SEGMENT_LENGTH {
        return Err(ValidationError::InvalidSegment {
            segment: segment.to_owned(),
            reason: format!("longer than {MAX_SEGMENT_LENGTH} bytes"),
        });
    }
    if let Some(ch) = segment
        .chars()
        .find(|ch| !ch.is_alphanumeric() && *ch != '-' && *ch != '_')
    {
        return Err(ValidationError::InvalidSegment {
            segment: segment.to_owned(),
            reason: format!("contains '{ch}'"),
        });
    }
    Ok(())
}

/// Join segments into the transport's topic string.
pub fn join_topic<S: AsRef<str>>(segments: &[S]) -> String {
    let mut topic = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            topic.push(TOPIC_SEPARATOR);
        }
        topic.push_str(segment.as_ref());
    }
    topic
}

/// Split a transport topic string into segments.
pub fn split_topic(topic: &str) -> Vec<String> {
    if topic.is_empty() {
        return Vec::new();
    }
    topic.split(TOPIC_SEPARATOR).map(str::to_owned).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// ClientIdentifier
// ─────────────────────────────────────────────────────────────────────────────

/// Identity of one connected client.
///
/// Created once when a connection is set up and never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientIdentifier {
    namespace: Vec<String>,
    app_id: String,
    group_id: String,
    client_id: String,
}

impl ClientIdentifier {
    /// Build an identity, validating every segment.
    pub fn new<I, S>(
        namespace: I,
        app_id: impl Into<String>,
        group_id: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = Self {
            namespace: namespace.into_iter().map(Into::into).collect(),
            app_id: app_id.into(),
            group_id: group_id.into(),
            client_id: client_id.into(),
        };
        for (position, segment) in id.topic_prefix().iter().enumerate() {
            validate_segment(segment, position)?;
        }
        Ok(id)
    }

    /// Namespace prefix segments.
    pub fn namespace(&self) -> &[String] {
        &self.namespace
    }

    /// Application id.
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Group id.
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Client id.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// `<namespace…>.<app>.<group>.<client>` as segments.
    pub fn topic_prefix(&self) -> Vec<String> {
        self.addressed(&self.group_id, &self.client_id)
    }

    /// Identity prefix with the group and client replaced, used to address
    /// another member of the same application.
    pub fn addressed(&self, group_id: &str, client_id: &str) -> Vec<String> {
        let mut segments = Vec::with_capacity(self.namespace.len() + 3);
        segments.extend(self.namespace.iter().cloned());
        segments.push(self.app_id.clone());
        segments.push(group_id.to_owned());
        segments.push(client_id.to_owned());
        segments
    }

    /// Full topic for `subject` under this identity.
    pub fn topic_for(&self, subject: &Subject) -> Vec<String> {
        let mut segments = self.topic_prefix();
        segments.extend(subject.segments().iter().cloned());
        segments
    }

    /// Number of leading segments of `path` that address this client.
    ///
    /// Accepts the exact identity as well as its broadcast forms (group-wide
    /// and application-wide). Returns `None` when `path` does not start with
    /// an identity prefix this client answers to.
    pub fn owned_prefix_len(&self, path: &[String]) -> Option<usize> {
        let ns = self.namespace.len();
        let len = ns + 3;
        if path.len() < len {
            return None;
        }
        if path[..ns] != self.namespace[..] || path[ns] != self.app_id {
            return None;
        }
        let group = &path[ns + 1];
        let client = &path[ns + 2];
        let group_ok = *group == self.group_id || group == BROADCAST_SEGMENT;
        let client_ok = *client == self.client_id || client == BROADCAST_SEGMENT;
        (group_ok && client_ok).then_some(len)
    }

    /// Transport filters covering every topic addressed to this client.
    pub fn subscription_filters(&self) -> Vec<String> {
        let mut own = self.topic_prefix();
        own.push("#".to_owned());
        let mut group = self.addressed(&self.group_id, BROADCAST_SEGMENT);
        group.push("#".to_owned());
        let mut all = self.addressed(BROADCAST_SEGMENT, BROADCAST_SEGMENT);
        all.push("#".to_owned());
        vec![join_topic(&own), join_topic(&group), join_topic(&all)]
    }
}

impl fmt::Display for ClientIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&join_topic(&self.topic_prefix()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subject
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered, validated segments naming a message or RPC method.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subject(Vec<String>);

impl Subject {
    /// Start building a subject.
    pub fn builder() -> SubjectBuilder {
        SubjectBuilder::default()
    }

    /// Parse a dotted subject string (`"sim.step"`).
    pub fn parse(dotted: &str) -> Result<Self, ValidationError> {
        split_topic(dotted)
            .into_iter()
            .fold(Self::builder(), |builder, segment| builder.segment(segment))
            .build()
    }

    /// Build from already split segments.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        segments
            .into_iter()
            .fold(Self::builder(), |builder, segment| builder.segment(segment))
            .build()
    }

    /// The subject's segments.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`; a built subject has at least one segment.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&join_topic(&self.0))
    }
}

/// Validating builder for [`Subject`].
#[derive(Clone, Debug, Default)]
pub struct SubjectBuilder {
    segments: Vec<String>,
}

impl SubjectBuilder {
    /// Append one segment.
    #[must_use]
    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    /// Validate and freeze.
    pub fn build(self) -> Result<Subject, ValidationError> {
        if self.segments.is_empty() {
            return Err(ValidationError::EmptySubject);
        }
        for (position, segment) in self.segments.iter().enumerate() {
            validate_segment(segment, position)?;
        }
        Ok(Subject(self.segments))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Destination
// ─────────────────────────────────────────────────────────────────────────────

/// Which client(s) a request is published to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Destination {
    /// Every client of the application.
    All,
    /// Every client in one group.
    Group {
        /// Target group id.
        group_id: String,
    },
    /// One specific client.
    Client {
        /// Target group id.
        group_id: String,
        /// Target client id.
        client_id: String,
    },
    /// The sending client itself.
    Own,
}

impl Destination {
    /// Send to every member of `group_id`.
    pub fn group(group_id: impl Into<String>) -> Self {
        Self::Group {
            group_id: group_id.into(),
        }
    }

    /// Send to one client.
    pub fn client(group_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self::Client {
            group_id: group_id.into(),
            client_id: client_id.into(),
        }
    }

    /// Group segment this destination resolves to for `source`.
    pub fn group_id<'a>(&'a self, source: &'a ClientIdentifier) -> &'a str {
        match self {
            Self::All => BROADCAST_SEGMENT,
            Self::Group { group_id } | Self::Client { group_id, .. } => group_id,
            Self::Own => source.group_id(),
        }
    }

    /// Client segment this destination resolves to for `source`.
    pub fn client_id<'a>(&'a self, source: &'a ClientIdentifier) -> &'a str {
        match self {
            Self::All | Self::Group { .. } => BROADCAST_SEGMENT,
            Self::Client { client_id, .. } => client_id,
            Self::Own => source.client_id(),
        }
    }

    /// Whether more than one responder may legitimately answer.
    pub fn is_fan_out(&self) -> bool {
        matches!(self, Self::All | Self::Group { .. })
    }

    /// Topic segments for `subject` sent from `source` to this destination.
    pub fn topic_for(&self, source: &ClientIdentifier, subject: &Subject) -> Vec<String> {
        let mut segments = source.addressed(self.group_id(source), self.client_id(source));
        segments.extend(subject.segments().iter().cloned());
        segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    fn ident() -> ClientIdentifier {
        ClientIdentifier::new(["lab", "rig"], "sim", "plant", "c1").unwrap()
    }

    fn seg(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn identity_prefix_order() {
        assert_eq!(ident().topic_prefix(), seg(&["lab", "rig", "sim", "plant", "c1"]));
        assert_eq!(ident().to_string(), "lab.rig.sim.plant.c1");
    }

    #[test]
    fn identity_rejects_bad_segment() {
        let err = ClientIdentifier::new(Vec::<String>::new(), "sim", "a.b", "c").unwrap_err();
        assert_matches!(err, ValidationError::InvalidSegment { .. });
        let err = ClientIdentifier::new(Vec::<String>::new(), "sim", "g", "").unwrap_err();
        assert_eq!(err, ValidationError::EmptySegment { position: 2 });
    }

    #[test]
    fn owned_prefix_accepts_own_and_broadcast() {
        let id = ident();
        let own = seg(&["lab", "rig", "sim", "plant", "c1", "x"]);
        let group = seg(&["lab", "rig", "sim", "plant", "_all", "x"]);
        let all = seg(&["lab", "rig", "sim", "_all", "_all", "x"]);
        assert_eq!(id.owned_prefix_len(&own), Some(5));
        assert_eq!(id.owned_prefix_len(&group), Some(5));
        assert_eq!(id.owned_prefix_len(&all), Some(5));
    }

    #[test]
    fn owned_prefix_rejects_foreign_paths() {
        let id = ident();
        assert_eq!(id.owned_prefix_len(&seg(&["lab", "rig", "sim", "plant", "c2"])), None);
        assert_eq!(id.owned_prefix_len(&seg(&["other", "rig", "sim", "plant", "c1"])), None);
        assert_eq!(id.owned_prefix_len(&seg(&["step"])), None);
    }

    #[test]
    fn subscription_filters_cover_broadcasts() {
        let filters = ident().subscription_filters();
        assert_eq!(
            filters,
            vec![
                "lab.rig.sim.plant.c1.#",
                "lab.rig.sim.plant._all.#",
                "lab.rig.sim._all._all.#"
            ]
        );
    }

    #[test]
    fn subject_builder_validates() {
        let subject = Subject::builder().segment("sim").segment("step").build().unwrap();
        assert_eq!(subject.to_string(), "sim.step");
        assert_eq!(subject.len(), 2);
        assert_eq!(Subject::builder().build().unwrap_err(), ValidationError::EmptySubject);
        assert_matches!(
            Subject::builder().segment("a b").build(),
            Err(ValidationError::InvalidSegment { .. })
        );
    }

    #[test]
    fn subject_parse_rejects_empty_segments() {
        assert_eq!(
            Subject::parse("a..b").unwrap_err(),
            ValidationError::EmptySegment { position: 1 }
        );
        assert_eq!(Subject::parse("").unwrap_err(), ValidationError::EmptySubject);
    }

    #[test]
    fn destination_topics() {
        let id = ident();
        let subject = Subject::parse("sim.step").unwrap();
        assert_eq!(
            Destination::All.topic_for(&id, &subject),
            seg(&["lab", "rig", "sim", "_all", "_all", "sim", "step"])
        );
        assert_eq!(
            Destination::group("plant").topic_for(&id, &subject),
            seg(&["lab", "rig", "sim", "plant", "_all", "sim", "step"])
        );
        assert_eq!(
            Destination::client("ctrl", "c9").topic_for(&id, &subject),
            seg(&["lab", "rig", "sim", "ctrl", "c9", "sim", "step"])
        );
        assert_eq!(Destination::Own.topic_for(&id, &subject), id.topic_for(&subject));
        assert!(Destination::All.is_fan_out());
        assert!(!Destination::Own.is_fan_out());
    }

    #[test]
    fn join_and_split() {
        assert_eq!(join_topic(&["a", "b", "c"]), "a.b.c");
        assert_eq!(split_topic("a.b.c"), seg(&["a", "b", "c"]));
        assert!(split_topic("").is_empty());
    }

    proptest! {
        #[test]
        fn split_inverts_join(parts in proptest::collection::vec("[a-z0-9_-]{1,12}", 1..8)) {
            let joined = join_topic(&parts);
            prop_assert_eq!(split_topic(&joined), parts);
        }
    }
}
