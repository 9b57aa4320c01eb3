use apache_avro::Schema;
use stream_config::producer::SubjectStrategy;

use crate::SchemaRegistrationError;

/// Registry subject for a value schema published to `topic`.
pub fn subject_name(
    schema: &Schema,
    strategy: SubjectStrategy,
    topic: &str,
) -> Result<String, SchemaRegistrationError> {
    match strategy {
        SubjectStrategy::TopicName => Ok(format!("{topic}-value")),
        SubjectStrategy::RecordName => match schema {
            Schema::Record(record) => Ok(record.name.fullname(None)),
            _ => Err(SchemaRegistrationError::Unnamed),
        },
    }
}
