use anyhow::Result;
use clap::Parser;
use ktap::{consume, parse_offsets, ConsumeConfig, Encoding, KafkaSession};
use std::{sync::Arc, time::Duration};
use time::OffsetDateTime;

#[derive(Debug, Parser)]
#[command(name = "ktap", version, about = "Tap into a Kafka topic", after_help = OFFSETS_HELP)]
struct Args {
    #[arg(long, help = "Topic to consume (also via KT_TOPIC, required)")]
    topic: Option<String>,
    #[arg(
        long,
        help = "Comma separated list of brokers. Port defaults to 9092 when omitted \
                (also via KT_BROKERS, defaults to localhost:9092)"
    )]
    brokers: Option<String>,
    #[arg(
        long,
        default_value = "",
        help = "What messages to read, by partition and offset range (defaults to all)"
    )]
    offsets: String,
    #[arg(
        long,
        default_value = "0",
        value_parser = parse_timeout,
        help = "Terminate a partition after not reading messages for this long, e.g. 30s (0 to disable)"
    )]
    timeout: Duration,
    #[arg(
        long,
        help = "Consumer group for the resume anchor; offsets are marked when supplied"
    )]
    group: Option<String>,
    #[arg(long, default_value = "string", help = "Present message keys as string, hex or base64")]
    encodekey: Encoding,
    #[arg(long, default_value = "string", help = "Present message values as string, hex or base64")]
    encodevalue: Encoding,
    #[arg(
        long,
        default_value_t = true,
        action = clap::ArgAction::Set,
        help = "Pretty-print the output records"
    )]
    pretty: bool,
    #[arg(long, help = "More verbose logging to stderr")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(args.verbose);

    let Some(topic) = args.topic.or_else(|| env_var("KT_TOPIC")) else {
        usage_error("topic name is required");
    };
    let brokers = args
        .brokers
        .or_else(|| env_var("KT_BROKERS"))
        .unwrap_or_else(|| "localhost:9092".to_owned());
    let spec = match parse_offsets(&args.offsets, OffsetDateTime::now_utc()) {
        Ok(spec) => spec,
        Err(err) => usage_error(&err.to_string()),
    };

    let session = KafkaSession::connect(&normalize_brokers(&brokers), &client_id())?;
    let config = ConsumeConfig {
        topic,
        spec,
        idle_timeout: (!args.timeout.is_zero()).then_some(args.timeout),
        group: args.group,
        encode_key: args.encodekey,
        encode_value: args.encodevalue,
        pretty: args.pretty,
    };
    consume::run(Arc::new(session), config).await?;
    Ok(())
}

fn init_logger(verbose: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();
}

fn parse_timeout(s: &str) -> Result<Duration, humantime::DurationError> {
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(s)
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Append the default Kafka port to any broker lacking one.
fn normalize_brokers(brokers: &str) -> String {
    brokers
        .split(',')
        .map(|broker| {
            let broker = broker.trim();
            if broker.contains(':') {
                broker.to_owned()
            } else {
                format!("{broker}:9092")
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn client_id() -> String {
    let user: String = std::env::var("USER")
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .collect();
    if user.is_empty() {
        "ktap-consume-anon".to_owned()
    } else {
        format!("ktap-consume-{user}")
    }
}

fn usage_error(message: &str) -> ! {
    eprintln!("{message}");
    eprintln!("use \"ktap --help\" for more information");
    std::process::exit(2)
}

const OFFSETS_HELP: &str = r#"Offsets can be specified as a comma-separated list of intervals:

  [[partition=start:end],...]

For example:

    3=100:300,5=43:67

would consume from offset 100 to offset 300 inclusive in partition 3,
and from 43 to 67 in partition 5. The default is to consume from the
oldest offset on every partition.

 - partition is the numeric identifier of a partition, or "all" to set
   a default interval for all partitions.

 - start is the included offset where consumption should start.

 - end is the included offset where consumption should end.

Each offset may be an absolute number, one of the anchors "oldest",
"newest" or "resume" (the latter requires --group), or a timestamp in
square brackets such as [2019-08-31], [13:45] or [3pm]. A timestamp
written at reduced precision covers its whole range, so [2019-08-31]
starts at the first message of that day. Anchors take a signed
displacement: "1=+20" skips the first 20 messages of partition 1, and
"1=-10" reads only its last 10. Bare displacements anchor themselves,
so "+10:" is "oldest+10:" and "-10:" is "newest-10:".

More examples:

  0=10:20       offsets 10 to 20 (inclusive) of partition 0
  all=2:10      offsets 2 to 10 of every partition
  all=1:10,2=5  partition 2 from offset 5, everything else from 1 to 10
  0=4:,2=1:10,6 three partitions with different ranges
  newest:       only new messages, on every partition
  resume:       where the group left off (with --group)

The values for --topic and --brokers can also be set via the environment
variables KT_TOPIC and KT_BROKERS respectively; flags win over the
environment."#;
