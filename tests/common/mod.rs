//! Shared test fixtures: a small `Task` resource and a programmable mock
//! resource-API client with recorded calls.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use livelist::{
    ChannelId, ChannelTransport, Filter, Resource, ResourceClient, TransportError,
};

// ============================================================================
// Task resource
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct Task {
    pub id: String,
    pub team: i64,
    pub status: String,
    pub version: Option<u64>,
}

impl Resource for Task {
    fn primary_key(&self) -> String {
        self.id.clone()
    }

    fn version_key(&self) -> Option<u64> {
        self.version
    }

    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "team" => Some(json!(self.team)),
            "status" => Some(json!(self.status)),
            _ => None,
        }
    }
}

pub fn task(id: &str, team: i64, status: &str) -> Task {
    Task {
        id: id.to_string(),
        team,
        status: status.to_string(),
        version: None,
    }
}

pub fn task_v(id: &str, team: i64, status: &str, version: u64) -> Task {
    Task {
        version: Some(version),
        ..task(id, team, status)
    }
}

/// Comparator sorting by primary key.
pub fn by_id() -> Arc<dyn Fn(&Task, &Task) -> std::cmp::Ordering + Send + Sync> {
    Arc::new(|a, b| a.id.cmp(&b.id))
}

// ============================================================================
// Mock channel transport
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub enum ChannelCall {
    Open(Filter),
    ChangeParams(ChannelId, Filter),
    Unsubscribe(ChannelId),
}

pub struct MockChannel {
    id: ChannelId,
    calls: Arc<Mutex<Vec<ChannelCall>>>,
    fail_change_params: Arc<Mutex<bool>>,
}

#[async_trait]
impl ChannelTransport for MockChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    async fn change_params(&self, filter: &Filter) -> Result<(), TransportError> {
        self.calls
            .lock()
            .push(ChannelCall::ChangeParams(self.id, filter.clone()));
        if *self.fail_change_params.lock() {
            return Err(TransportError::new("change_params refused"));
        }
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<(), TransportError> {
        self.calls.lock().push(ChannelCall::Unsubscribe(self.id));
        Ok(())
    }
}

// ============================================================================
// Mock client
// ============================================================================

type QueryResponder =
    Box<dyn Fn(&Filter) -> Result<Vec<Task>, TransportError> + Send + Sync>;

struct MockClientInner {
    responder: QueryResponder,
    query_calls: Vec<Filter>,
    /// Receivers a query must await before responding, consumed in order.
    query_gates: VecDeque<oneshot::Receiver<()>>,
    next_channel: u64,
    fail_open: bool,
}

pub struct MockClient {
    inner: Mutex<MockClientInner>,
    channel_calls: Arc<Mutex<Vec<ChannelCall>>>,
    fail_change_params: Arc<Mutex<bool>>,
}

impl MockClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(MockClientInner {
                responder: Box::new(|_| Ok(Vec::new())),
                query_calls: Vec::new(),
                query_gates: VecDeque::new(),
                next_channel: 1,
                fail_open: false,
            }),
            channel_calls: Arc::new(Mutex::new(Vec::new())),
            fail_change_params: Arc::new(Mutex::new(false)),
        })
    }

    /// Program the query response.
    pub fn respond_with(
        &self,
        f: impl Fn(&Filter) -> Result<Vec<Task>, TransportError> + Send + Sync + 'static,
    ) {
        self.inner.lock().responder = Box::new(f);
    }

    /// Make the next query block until the returned sender fires.
    pub fn gate_next_query(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().query_gates.push_back(rx);
        tx
    }

    pub fn fail_open_channel(&self) {
        self.inner.lock().fail_open = true;
    }

    pub fn fail_change_params(&self) {
        *self.fail_change_params.lock() = true;
    }

    pub fn query_calls(&self) -> Vec<Filter> {
        self.inner.lock().query_calls.clone()
    }

    pub fn channel_calls(&self) -> Vec<ChannelCall> {
        self.channel_calls.lock().clone()
    }
}

#[async_trait]
impl ResourceClient<Task> for MockClient {
    async fn query(&self, filter: &Filter) -> Result<Vec<Task>, TransportError> {
        let gate = {
            let mut inner = self.inner.lock();
            inner.query_calls.push(filter.clone());
            inner.query_gates.pop_front()
        };
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        let inner = self.inner.lock();
        (inner.responder)(filter)
    }

    async fn open_channel(
        &self,
        filter: &Filter,
    ) -> Result<Box<dyn ChannelTransport>, TransportError> {
        let mut inner = self.inner.lock();
        if inner.fail_open {
            return Err(TransportError::new("subscribe refused"));
        }
        let id = ChannelId(inner.next_channel);
        inner.next_channel += 1;
        self.channel_calls.lock().push(ChannelCall::Open(filter.clone()));
        Ok(Box::new(MockChannel {
            id,
            calls: Arc::clone(&self.channel_calls),
            fail_change_params: Arc::clone(&self.fail_change_params),
        }))
    }
}
