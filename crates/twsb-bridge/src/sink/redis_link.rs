//! Redis server sink over the synchronous `redis` client.

use std::time::Duration;

use tracing::debug;
use twsb_core::BridgeError;
use twsb_core::config::RedisSettings;

use super::{Connector, RedisLink, WriteOp};

/// Opens connections to one Redis server.
pub struct RedisConnector {
    client: redis::Client,
    url: String,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl RedisConnector {
    /// Parse the configured URL. An unusable URL is fatal.
    pub fn new(settings: &RedisSettings) -> Result<Self, BridgeError> {
        let url = settings.effective_url();
        let client = redis::Client::open(url.as_str())
            .map_err(|e| BridgeError::FatalConfig(format!("redis url '{url}': {e}")))?;
        Ok(Self {
            client,
            url,
            connect_timeout: settings.effective_connect_timeout(),
            io_timeout: settings.effective_io_timeout(),
        })
    }
}

impl Connector for RedisConnector {
    fn connect(&self) -> Result<Box<dyn RedisLink>, BridgeError> {
        let con = self.client.get_connection_with_timeout(self.connect_timeout)?;
        con.set_read_timeout(Some(self.io_timeout))?;
        con.set_write_timeout(Some(self.io_timeout))?;
        debug!("[redis] connected to {}", self.url);
        Ok(Box::new(RedisConnectionLink { con }))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

struct RedisConnectionLink {
    con: redis::Connection,
}

impl RedisLink for RedisConnectionLink {
    fn ping(&mut self) -> Result<(), BridgeError> {
        let reply: String = redis::cmd("PING").query(&mut self.con)?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(BridgeError::TransientIo(format!("unexpected PING reply '{reply}'")))
        }
    }

    fn apply(&mut self, ops: &[WriteOp]) -> Result<(), BridgeError> {
        let mut pipe = redis::pipe();
        for op in ops {
            match op {
                WriteOp::Set { key, value } => {
                    pipe.cmd("SET").arg(key).arg(value).ignore();
                }
                WriteOp::Publish { channel, message } => {
                    pipe.cmd("PUBLISH").arg(channel).arg(message).ignore();
                }
                WriteOp::Append { stream, maxlen, field, value } => {
                    pipe.cmd("XADD")
                        .arg(stream)
                        .arg("MAXLEN")
                        .arg("~")
                        .arg(*maxlen)
                        .arg("*")
                        .arg(field)
                        .arg(value)
                        .ignore();
                }
            }
        }
        pipe.query::<()>(&mut self.con)?;
        Ok(())
    }
}
