//! The object the harness client talks to.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use relay_fabric::codec::{BincodeCodec, Codec};
use relay_invoke::{Blobject, Current, DispatchOutcome, ShutdownSignal};
use tracing::{debug, info};

/// Type id raised by `opException`.
pub const MY_EXCEPTION: &str = "::Test::MyException";

/// Generic servant behind the harness identity.
///
/// | operation      | parameters       | result                      |
/// |----------------|------------------|-----------------------------|
/// | `opOneway`     | none             | none, bumps a counter       |
/// | `opString`     | `String`         | `(String, String)` copies   |
/// | `opException`  | none             | user failure `MY_EXCEPTION` |
/// | `echo`         | raw bytes        | the same bytes              |
/// | `log`          | raw bytes        | none, bytes are recorded    |
/// | `getLog`       | none             | `Vec<Vec<u8>>` of the log   |
/// | `onewayCount`  | none             | `u64` counter               |
/// | `shutdown`     | none             | none, stops the server      |
///
/// Typed parameters and results use bincode.
pub struct TestServant {
    codec: BincodeCodec,
    oneway_calls: AtomicU64,
    log: Mutex<Vec<Bytes>>,
    shutdown: ShutdownSignal,
}

impl TestServant {
    pub fn new(shutdown: ShutdownSignal) -> Self {
        Self {
            codec: BincodeCodec,
            oneway_calls: AtomicU64::new(0),
            log: Mutex::new(Vec::new()),
            shutdown,
        }
    }

    pub fn oneway_calls(&self) -> u64 {
        self.oneway_calls.load(Ordering::Relaxed)
    }

    pub fn logged(&self) -> Vec<Bytes> {
        self.log.lock().clone()
    }

    fn encode<T: serde::Serialize>(&self, value: &T) -> DispatchOutcome {
        match self.codec.encode(value) {
            Ok(bytes) => DispatchOutcome::ok(bytes),
            Err(e) => DispatchOutcome::failed(e.to_string()),
        }
    }
}

#[async_trait::async_trait]
impl Blobject for TestServant {
    async fn try_invoke(&self, current: &Current, params: Bytes) -> DispatchOutcome {
        match current.operation.as_str() {
            "opOneway" => {
                self.oneway_calls.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::ok(Bytes::new())
            }
            "opString" => match self.codec.decode::<String>(&params) {
                Ok(s) => self.encode(&(s.clone(), s)),
                Err(e) => DispatchOutcome::failed(format!("opString: {e}")),
            },
            "opException" => DispatchOutcome::user_failure(MY_EXCEPTION, Bytes::new()),
            "echo" => DispatchOutcome::Ok(params),
            "log" => {
                debug!(len = params.len(), "log");
                self.log.lock().push(params);
                DispatchOutcome::ok(Bytes::new())
            }
            "getLog" => {
                let log: Vec<Vec<u8>> = self.log.lock().iter().map(|b| b.to_vec()).collect();
                self.encode(&log)
            }
            "onewayCount" => self.encode(&self.oneway_calls()),
            "shutdown" => {
                info!("shutdown requested by client");
                self.shutdown.trigger();
                DispatchOutcome::ok(Bytes::new())
            }
            _ => DispatchOutcome::NotImplemented,
        }
    }
}
