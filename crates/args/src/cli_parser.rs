use clap::{Args, Parser, ValueEnum};
use stream_config::producer::SubjectStrategy;

#[derive(Parser, Debug)]
#[command(name = "schema-stream")]
#[command(author)]
#[command(version)]
#[command(propagate_version = true)]
#[command(about = "Produce and consume schema-registry encoded Avro records", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub action: Action,
    #[clap(value_enum, default_value_t=LogOutput::StdOut)]
    #[arg(short, long)]
    pub log_output: LogOutput,
}

#[derive(ValueEnum, Clone, Debug)]
pub enum LogOutput {
    StdOut,
    StdErr,
}

#[derive(clap::Subcommand, Debug)]
pub enum Action {
    /// Register the sample schema and publish the five sample records
    Produce(ProducerArgs),
    /// Print every record of the topic until interrupted
    Consume(ConsumerArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum SubjectArg {
    #[default]
    RecordName,
    TopicName,
}

impl From<SubjectArg> for SubjectStrategy {
    fn from(arg: SubjectArg) -> Self {
        match arg {
            SubjectArg::RecordName => SubjectStrategy::RecordName,
            SubjectArg::TopicName => SubjectStrategy::TopicName,
        }
    }
}

#[derive(Args, Debug)]
pub struct ProducerArgs {
    /// Overrides KAFKA_TOPIC
    #[arg(short, long)]
    pub topic: Option<String>,
    #[arg(short, long, value_enum, default_value_t = SubjectArg::RecordName)]
    pub subject_strategy: SubjectArg,
}

#[derive(Args, Debug)]
pub struct ConsumerArgs {
    /// Overrides KAFKA_TOPIC
    #[arg(short, long)]
    pub topic: Option<String>,
    /// Overrides KAFKA_CONSUMER_GROUP
    #[arg(short = 'g', long = "group")]
    pub consumer_group_id: Option<String>,
    /// Join a brand-new group so the whole topic is replayed
    #[arg(short, long)]
    pub fresh_group: bool,
}
