use std::sync::atomic::{AtomicU64, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::info;

/// Process-wide tunnel counters shared by every listener.
#[derive(Debug, Default)]
pub struct TunnelStats {
    pub active_tunnels: AtomicU32,
    pub total_tunnels: AtomicU64,
    pub failed_tunnels: AtomicU64,
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub active_tunnels: u32,
    pub total_tunnels: u64,
    pub failed_tunnels: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

impl TunnelStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn tunnel_started(&self) {
        self.active_tunnels.fetch_add(1, Ordering::Relaxed);
        self.total_tunnels.fetch_add(1, Ordering::Relaxed);
    }

    /// A client whose tunnel could not be built.
    pub fn tunnel_failed(&self) {
        self.failed_tunnels.fetch_add(1, Ordering::Relaxed);
    }

    /// `bytes_in` flowed client to tunnel, `bytes_out` tunnel to client.
    pub fn tunnel_closed(&self, bytes_in: u64, bytes_out: u64) {
        self.active_tunnels.fetch_sub(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes_in, Ordering::Relaxed);
        self.bytes_out.fetch_add(bytes_out, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            active_tunnels: self.active_tunnels.load(Ordering::Relaxed),
            total_tunnels: self.total_tunnels.load(Ordering::Relaxed),
            failed_tunnels: self.failed_tunnels.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let s = self.snapshot();
        info!(
            "[stats] active={} total={} failed={} bytes_in={:.1}MB bytes_out={:.1}MB",
            s.active_tunnels,
            s.total_tunnels,
            s.failed_tunnels,
            s.bytes_in as f64 / 1_048_576.0,
            s.bytes_out as f64 / 1_048_576.0
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_tunnel_lifecycle() {
        let stats = TunnelStats::new();
        stats.tunnel_started();
        stats.tunnel_started();
        stats.tunnel_failed();
        stats.tunnel_closed(10, 20);

        let s = stats.snapshot();
        assert_eq!(s.active_tunnels, 1);
        assert_eq!(s.total_tunnels, 2);
        assert_eq!(s.failed_tunnels, 1);
        assert_eq!(s.bytes_in, 10);
        assert_eq!(s.bytes_out, 20);
    }
}
