use crate::ConnectionConfig;

/// How the registry subject for the value schema is derived.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SubjectStrategy {
    /// Fully qualified record name, e.g. `com.mycorp.mynamespace.sampleRecord`.
    #[default]
    RecordName,
    /// `<topic>-value`.
    TopicName,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProducerConfig {
    pub topic: String,
    pub subject_strategy: SubjectStrategy,
}

impl ProducerConfig {
    pub fn new(
        connection: &ConnectionConfig,
        topic: Option<String>,
        subject_strategy: SubjectStrategy,
    ) -> Self {
        Self {
            topic: topic.unwrap_or_else(|| connection.topic.clone()),
            subject_strategy,
        }
    }
}
