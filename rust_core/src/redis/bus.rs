use crate::event_log::{EventLog, LogRecord, ReadFrom};
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client, Value};
use std::collections::HashMap;
use std::env;
use tracing::{debug, info};

/// Multiplexed connections keep request/reply pairing intact when a caller
/// drops a command future mid-flight, e.g. under a processing deadline.
#[derive(Clone)]
pub struct RedisBus {
    client: Client,
    connection: MultiplexedConnection,
    /// Blocking stream reads get their own connection so appends and acks
    /// are not queued behind them.
    read_connection: MultiplexedConnection,
}

impl RedisBus {
    pub async fn new() -> Result<Self> {
        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        Self::connect(&redis_url).await
    }

    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("Invalid Redis URL")?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to Redis")?;
        let read_connection = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to open Redis read connection")?;

        Ok(Self {
            client,
            connection,
            read_connection,
        })
    }

    /// Dedicated pub/sub connection subscribed to `channel`.
    pub async fn subscribe(&self, channel: &str) -> Result<redis::aio::PubSub> {
        let conn = self.client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(channel).await?;
        Ok(pubsub)
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    redis::from_redis_value::<String>(value).ok()
}

#[async_trait]
impl EventLog for RedisBus {
    async fn ensure_group(&self, streams: &[String], group: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        for stream in streams {
            let created: redis::RedisResult<()> = conn.xgroup_create_mkstream(stream, group, "0").await;
            match created {
                Ok(()) => info!("Created consumer group {} on {}", group, stream),
                Err(e) if e.code() == Some("BUSYGROUP") => {
                    debug!("Consumer group {} already exists on {}", group, stream)
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to create group {} on {}", group, stream))
                }
            }
        }
        Ok(())
    }

    async fn read_group(
        &self,
        streams: &[String],
        group: &str,
        consumer: &str,
        from: ReadFrom,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<LogRecord>> {
        let start = match from {
            ReadFrom::Pending => "0",
            ReadFrom::New => ">",
        };
        let ids = vec![start; streams.len()];
        let mut opts = StreamReadOptions::default().group(group, consumer).count(count);
        if from == ReadFrom::New && block_ms > 0 {
            opts = opts.block(block_ms as usize);
        }

        let reply: Option<StreamReadReply> = {
            let mut conn = self.read_connection.clone();
            conn.xread_options(streams, &ids[..], &opts)
                .await
                .context("XREADGROUP failed")?
        };

        let mut records = Vec::new();
        for key in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in key.ids {
                // Pending entries trimmed from the stream come back without
                // fields; they still surface so the consumer can ack them.
                let fields: HashMap<String, String> = entry
                    .map
                    .iter()
                    .filter_map(|(k, v)| value_to_string(v).map(|v| (k.clone(), v)))
                    .collect();
                records.push(LogRecord {
                    stream: key.key.clone(),
                    id: entry.id,
                    fields,
                });
            }
        }
        Ok(records)
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        conn.xack::<_, _, _, i64>(stream, group, &[id])
            .await
            .with_context(|| format!("Failed to ack {} on {}", id, stream))?;
        Ok(())
    }

    async fn append(&self, stream: &str, fields: &[(&str, String)]) -> Result<String> {
        let mut conn = self.connection.clone();
        let id: String = conn
            .xadd(stream, "*", fields)
            .await
            .with_context(|| format!("Failed to append to {}", stream))?;
        Ok(id)
    }
}
