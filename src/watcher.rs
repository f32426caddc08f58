/* This file is part of DarkFi (https://dark.fi)
 *
 * Copyright (C) 2020-2026 Dyne.org foundation
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Contract event observation over a websocket connection.
//!
//! A [`Connection`] is bound to one deployed contract. The first
//! subscription starts a single log pump that reads every log emitted by
//! the contract, decodes it against the ABI and hands it to the
//! [`Registry`]. Since there is only one stream per connection, an event
//! can never reach the same handler twice, and handlers see events in
//! chain order.

use std::sync::Arc;

use ethers::{
    abi::{Abi, RawLog, Token},
    providers::{Middleware, Provider, Ws},
    types::{Address, BlockNumber, Filter, Log, H256},
};
use futures::{Stream, StreamExt};
use log::{debug, error, info, warn};
use tokio::{
    sync::{oneshot, Mutex},
    task::JoinHandle,
};
use url::Url;

use crate::{Error, Result};

/// A decoded contract event.
#[derive(Clone, Debug, PartialEq)]
pub struct EventRecord {
    pub name: String,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<H256>,
    pub transaction_index: Option<u64>,
    pub log_index: Option<u64>,
    /// Decoded arguments, in declaration order
    pub args: Vec<(String, Token)>,
}

impl EventRecord {
    /// Decode `log` against the events of `abi`.
    ///
    /// Returns `Ok(None)` for logs that match no known event signature,
    /// and for logs a reorg rolled back (`removed: true`).
    /// Anonymous events carry no signature topic and are never matched.
    pub fn decode(abi: &Abi, log: &Log) -> Result<Option<Self>> {
        if log.removed == Some(true) {
            return Ok(None)
        }

        let Some(topic0) = log.topics.first() else { return Ok(None) };
        let Some(event) = abi.events().find(|e| !e.anonymous && e.signature() == *topic0) else {
            return Ok(None)
        };

        let raw = RawLog { topics: log.topics.clone(), data: log.data.to_vec() };
        let parsed = event.parse_log(raw)?;

        Ok(Some(Self {
            name: event.name.clone(),
            block_number: log.block_number.map(|n| n.as_u64()),
            transaction_hash: log.transaction_hash,
            transaction_index: log.transaction_index.map(|n| n.as_u64()),
            log_index: log.log_index.map(|n| n.as_u64()),
            args: parsed.params.into_iter().map(|p| (p.name, p.value)).collect(),
        }))
    }

    /// Look up a decoded argument by name.
    pub fn arg(&self, name: &str) -> Option<&Token> {
        self.args.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    fn position(&self) -> (u64, u64, u64) {
        (
            self.block_number.unwrap_or(u64::MAX),
            self.transaction_index.unwrap_or(u64::MAX),
            self.log_index.unwrap_or(u64::MAX),
        )
    }
}

/// Callback invoked with every delivered event.
pub type EventHandler = Box<dyn FnMut(&EventRecord) + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Fire for the first matching event, then drop the handler
    Once,
    /// Fire for every matching event until unsubscribed
    Continuous,
}

struct Listener {
    event: String,
    delivery: Delivery,
    handler: EventHandler,
}

/// Registered event handlers of one connection.
#[derive(Default)]
pub struct Registry {
    listeners: Vec<Listener>,
}

impl Registry {
    pub fn register(&mut self, event: &str, delivery: Delivery, handler: EventHandler) {
        self.listeners.push(Listener { event: event.to_string(), delivery, handler });
    }

    /// Deliver `record` to every matching handler.
    /// One-shot handlers are removed once they fired.
    /// Returns the number of handlers invoked.
    pub fn dispatch(&mut self, record: &EventRecord) -> usize {
        let mut invoked = 0;
        self.listeners.retain_mut(|listener| {
            if listener.event != record.name {
                return true
            }

            (listener.handler)(record);
            invoked += 1;
            listener.delivery == Delivery::Continuous
        });
        invoked
    }

    /// Drop every handler, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let n = self.listeners.len();
        self.listeners.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Subscribed,
}

impl ConnectionState {
    /// A pump whose log stream ended no longer counts as a subscription.
    fn of(connected: bool, pump: Option<&JoinHandle<()>>) -> Self {
        match (connected, pump) {
            (false, _) => Self::Disconnected,
            (true, Some(pump)) if !pump.is_finished() => Self::Subscribed,
            (true, _) => Self::Connected,
        }
    }
}

/// Decode every log of `stream` and hand it to `registry`, until the
/// stream ends.
async fn pump_logs<S>(stream: S, abi: &Abi, registry: &Mutex<Registry>)
where
    S: Stream<Item = Log>,
{
    futures::pin_mut!(stream);

    while let Some(log) = stream.next().await {
        let record = match EventRecord::decode(abi, &log) {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(
                    target: "solflow::watcher",
                    "Skipping log {:?} (removed={:?})", log.topics.first(), log.removed,
                );
                continue
            }
            Err(e) => {
                error!(target: "solflow::watcher", "Failed decoding log: {}", e);
                continue
            }
        };

        let invoked = registry.lock().await.dispatch(&record);
        debug!(
            target: "solflow::watcher",
            "{} in block {:?} delivered to {} handler(s)", record.name, record.block_number, invoked,
        );
    }
}

/// Persistent websocket connection bound to one deployed contract.
///
/// Subscriptions are released by [`Connection::unsubscribe_all`],
/// [`Connection::close`], or when the connection is dropped.
pub struct Connection {
    provider: Option<Arc<Provider<Ws>>>,
    address: Address,
    abi: Abi,
    registry: Arc<Mutex<Registry>>,
    pump: Option<JoinHandle<()>>,
}

impl Connection {
    /// Open a websocket connection to `endpoint` for the contract at `address`.
    pub async fn connect(endpoint: &Url, address: Address, abi: Abi) -> Result<Self> {
        let provider = Provider::<Ws>::connect(endpoint.as_str())
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        info!(target: "solflow::watcher", "Connected to {}", endpoint.host_str().unwrap_or("?"));

        Ok(Self {
            provider: Some(Arc::new(provider)),
            address,
            abi,
            registry: Arc::new(Mutex::new(Registry::default())),
            pump: None,
        })
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::of(self.provider.is_some(), self.pump.as_ref())
    }

    pub fn address(&self) -> Address {
        self.address
    }

    fn provider(&self) -> Result<&Arc<Provider<Ws>>> {
        self.provider.as_ref().ok_or_else(|| Error::Connection("connection is closed".to_string()))
    }

    /// Invoke `handler` for the first `event` emitted after this call.
    pub async fn subscribe_once<F>(&mut self, event: &str, handler: F) -> Result<()>
    where
        F: FnMut(&EventRecord) + Send + 'static,
    {
        self.subscribe(event, Delivery::Once, Box::new(handler)).await
    }

    /// Invoke `handler` for every `event` emitted after this call.
    pub async fn subscribe_continuous<F>(&mut self, event: &str, handler: F) -> Result<()>
    where
        F: FnMut(&EventRecord) + Send + 'static,
    {
        self.subscribe(event, Delivery::Continuous, Box::new(handler)).await
    }

    async fn subscribe(&mut self, event: &str, delivery: Delivery, handler: EventHandler) -> Result<()> {
        self.provider()?;
        self.abi.event(event).map_err(|_| Error::EventNotFound(event.to_string()))?;

        // Handlers are only kept once the node accepted the subscription.
        if self.state() != ConnectionState::Subscribed {
            self.start_pump().await?;
        }

        self.registry.lock().await.register(event, delivery, handler);
        debug!(target: "solflow::watcher", "Registered {:?} handler for {}", delivery, event);

        Ok(())
    }

    /// Subscribe to the contract's logs and spawn the task dispatching them.
    /// Returns once the node acknowledged the subscription.
    async fn start_pump(&mut self) -> Result<()> {
        let provider = self.provider()?.clone();
        let registry = self.registry.clone();
        let abi = self.abi.clone();
        let filter = Filter::new().address(self.address);
        let (ready_tx, ready_rx) = oneshot::channel();

        let pump = tokio::spawn(async move {
            let stream = match provider.subscribe_logs(&filter).await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(Error::Connection(e.to_string())));
                    return
                }
            };

            pump_logs(stream, &abi, &registry).await;
            warn!(target: "solflow::watcher", "Log stream ended");
        });

        match ready_rx.await {
            Ok(Ok(())) => {
                self.pump = Some(pump);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Connection("log pump exited before subscribing".to_string())),
        }
    }

    /// Drop every handler and stop the log pump. Safe to call repeatedly.
    pub async fn unsubscribe_all(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
            let _ = pump.await;
        }

        let n = self.registry.lock().await.clear();
        if n > 0 {
            info!(target: "solflow::watcher", "Cleared {} event handler(s)", n);
        }
    }

    /// Release every subscription and close the socket.
    pub async fn close(&mut self) {
        self.unsubscribe_all().await;
        if self.provider.take().is_some() {
            info!(target: "solflow::watcher", "Connection closed");
        }
    }

    /// Fetch past `event` occurrences in `[from_block, to_block]`, in chain order.
    pub async fn query_past_events(
        &self,
        event: &str,
        from_block: impl Into<BlockNumber>,
        to_block: impl Into<BlockNumber>,
    ) -> Result<Vec<EventRecord>> {
        let provider = self.provider()?;
        let signature = self
            .abi
            .event(event)
            .map_err(|_| Error::EventNotFound(event.to_string()))?
            .signature();

        let filter = Filter::new()
            .address(self.address)
            .topic0(signature)
            .from_block(from_block)
            .to_block(to_block);

        let logs = provider.get_logs(&filter).await?;

        let mut records = Vec::with_capacity(logs.len());
        for log in &logs {
            if let Some(record) = EventRecord::decode(&self.abi, log)? {
                records.push(record);
            }
        }
        records.sort_by_key(EventRecord::position);

        Ok(records)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}
