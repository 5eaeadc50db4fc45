use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::ConnectorPoolError;
use crate::recovery::{RecoverScan, XaResource, XaResourceFactory, XaResourceHandle, Xid};

/// Resource holding a fixed list of in-doubt branches until they are
/// committed, rolled back or forgotten.
#[derive(Debug)]
pub struct MockXaResource {
    name: String,
    in_doubt: Mutex<Vec<Xid>>,
}

impl MockXaResource {
    #[must_use]
    pub fn new(name: impl Into<String>, in_doubt: Vec<Xid>) -> Self {
        Self {
            name: name.into(),
            in_doubt: Mutex::new(in_doubt),
        }
    }

    fn resolve(&self, xid: &Xid) -> Result<(), ConnectorPoolError> {
        let mut in_doubt = self.in_doubt.lock().unwrap_or_else(PoisonError::into_inner);
        let before = in_doubt.len();
        in_doubt.retain(|x| x != xid);
        if in_doubt.len() == before {
            return Err(ConnectorPoolError::NotFoundError(format!("branch {xid}")));
        }
        Ok(())
    }
}

#[async_trait]
impl XaResource for MockXaResource {
    fn resource_name(&self) -> &str {
        &self.name
    }

    async fn recover(&self, _scan: RecoverScan) -> Result<Vec<Xid>, ConnectorPoolError> {
        Ok(self
            .in_doubt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn commit(&self, xid: &Xid, _one_phase: bool) -> Result<(), ConnectorPoolError> {
        self.resolve(xid)
    }

    async fn rollback(&self, xid: &Xid) -> Result<(), ConnectorPoolError> {
        self.resolve(xid)
    }

    async fn forget(&self, xid: &Xid) -> Result<(), ConnectorPoolError> {
        self.resolve(xid)
    }
}

/// Opens `count` [`MockXaResource`]s, each with one in-doubt branch.
#[derive(Debug, Default)]
pub struct MockXaResourceFactory {
    count: usize,
    failing_opens: AtomicUsize,
    opened: AtomicU64,
    closed: AtomicU64,
}

impl MockXaResourceFactory {
    #[must_use]
    pub fn with_resources(count: usize) -> Self {
        Self {
            count,
            ..Self::default()
        }
    }

    /// The next `n` calls to `open` fail.
    pub fn fail_next_opens(&self, n: usize) {
        self.failing_opens.store(n, Ordering::SeqCst);
    }

    /// Resources handed out so far.
    #[must_use]
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl XaResourceFactory for MockXaResourceFactory {
    async fn open(
        &self,
        jndi_name: Option<&str>,
    ) -> Result<Vec<XaResourceHandle>, ConnectorPoolError> {
        let fail = self
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let name = jndi_name.unwrap_or("mock");
        if fail {
            return Err(ConnectorPoolError::ConnectionError(format!(
                "resource manager for {name} unreachable"
            )));
        }
        let resources: Vec<XaResourceHandle> = (0..self.count)
            .map(|i| {
                let branch = u8::try_from(i).unwrap_or(u8::MAX);
                Arc::new(MockXaResource::new(
                    format!("{name}#{i}"),
                    vec![Xid::new(1, name.as_bytes(), &[branch])],
                )) as XaResourceHandle
            })
            .collect();
        self.opened.fetch_add(resources.len() as u64, Ordering::SeqCst);
        Ok(resources)
    }

    async fn close(&self, resources: Vec<XaResourceHandle>) -> Result<(), ConnectorPoolError> {
        self.closed.fetch_add(resources.len() as u64, Ordering::SeqCst);
        Ok(())
    }
}
