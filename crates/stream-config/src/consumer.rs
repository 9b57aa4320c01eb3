use crate::ConnectionConfig;

#[derive(Clone, Debug, PartialEq)]
pub struct ConsumerConfig {
    pub topic: String,
    pub consumer_group_id: String,
}

impl ConsumerConfig {
    /// `group_suffix` is appended to the group id, which gives a group with no
    /// committed offsets and therefore a full replay of the topic. Groups
    /// without committed offsets always start at the earliest offset.
    pub fn new(
        connection: &ConnectionConfig,
        topic: Option<String>,
        consumer_group_id: Option<String>,
        group_suffix: Option<String>,
    ) -> Self {
        let group = consumer_group_id.unwrap_or_else(|| connection.consumer_group.clone());
        Self {
            topic: topic.unwrap_or_else(|| connection.topic.clone()),
            consumer_group_id: match group_suffix {
                Some(suffix) => format!("{group}-{suffix}"),
                None => group,
            },
        }
    }
}
