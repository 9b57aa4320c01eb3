use serde::{Deserialize, Serialize};

pub const SAMPLE_SCHEMA: &str = include_str!("../resources/sample_record.avsc");

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub my_field1: i32,
    pub my_field2: f64,
    pub my_field3: String,
}

impl SampleRecord {
    fn new(my_field1: i32, my_field2: f64, my_field3: &str) -> Self {
        Self {
            my_field1,
            my_field2,
            my_field3: my_field3.to_string(),
        }
    }
}

/// The fixed batch published by the `produce` command, keyed `record-<index>`.
#[allow(clippy::approx_constant)]
pub fn sample_records() -> Vec<(String, SampleRecord)> {
    [
        SampleRecord::new(11111, 3.14159, "Hello, World!"),
        SampleRecord::new(100, 2.71828, "Sample text"),
        SampleRecord::new(255, 1.61803, "Avro rocks!"),
        SampleRecord::new(500, 1.41421, "Kafka streaming"),
        SampleRecord::new(999, 2.5, "Confluent Cloud"),
    ]
    .into_iter()
    .enumerate()
    .map(|(i, record)| (format!("record-{i}"), record))
    .collect()
}
