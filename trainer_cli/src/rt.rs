//! Real-time scheduling for the control loop (Linux SCHED_FIFO / affinity /
//! mlockall; memory locking only elsewhere). Every step is best effort: a
//! failure is logged and the loop runs without it.

use std::sync::OnceLock;

use crate::cli::RtLock;

#[derive(Debug, Clone, Copy)]
pub struct RtOptions {
    pub prio: Option<i32>,
    pub lock: RtLock,
    pub cpu: Option<usize>,
}

static RT_ONCE: OnceLock<()> = OnceLock::new();

/// Apply real-time settings once per process.
pub fn setup_rt_once(opts: RtOptions) {
    RT_ONCE.get_or_init(|| {
        match lock_memory(opts.lock) {
            Ok(()) => tracing::info!(lock = ?opts.lock, "rt: memory lock applied"),
            Err(e) => tracing::warn!(lock = ?opts.lock, error = %e, "rt: mlockall failed"),
        }
        #[cfg(target_os = "linux")]
        {
            match linux::fifo_priority(opts.prio) {
                Ok(p) => tracing::info!(prio = p, "rt: SCHED_FIFO applied"),
                Err(e) => tracing::warn!(error = %e, "rt: SCHED_FIFO not applied"),
            }
            let cpu = opts.cpu.unwrap_or(0);
            match linux::pin_to_cpu(cpu) {
                Ok(()) => tracing::info!(cpu, "rt: pinned"),
                Err(e) => tracing::warn!(cpu, error = %e, "rt: affinity not applied"),
            }
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = (opts.prio, opts.cpu);
            tracing::warn!("rt: SCHED_FIFO and affinity are Linux only; memory lock only");
        }
    });
}

fn os_result(rc: libc::c_int) -> std::io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

fn lock_memory(lock: RtLock) -> eyre::Result<()> {
    let flags = match lock {
        RtLock::None => return Ok(()),
        RtLock::Current => libc::MCL_CURRENT,
        RtLock::All => libc::MCL_CURRENT | libc::MCL_FUTURE,
    };
    // SAFETY: mlockall takes flags only and has no memory-safety preconditions.
    let first = os_result(unsafe { libc::mlockall(flags) });
    let Err(err) = first else { return Ok(()) };

    let retryable = matches!(err.raw_os_error(), Some(c) if c == libc::EPERM || c == libc::ENOMEM);
    if lock == RtLock::All && retryable {
        // SAFETY: as above.
        if os_result(unsafe { libc::mlockall(libc::MCL_CURRENT) }).is_ok() {
            tracing::warn!("rt: mlockall(current|future) refused; locked current pages only");
            return Ok(());
        }
    }
    if retryable {
        eyre::bail!("{err}; hint: needs CAP_IPC_LOCK (or root) and a sufficient 'ulimit -l'");
    }
    Err(eyre::Report::new(err))
}

#[cfg(target_os = "linux")]
mod linux {
    /// Bits in a `cpu_set_t`.
    const CPUSET_BITS: usize = std::mem::size_of::<libc::cpu_set_t>() * 8;

    pub fn fifo_priority(prio: Option<i32>) -> eyre::Result<i32> {
        // SAFETY: plain queries of the scheduler's priority range.
        let (min, max) = unsafe {
            (
                libc::sched_get_priority_min(libc::SCHED_FIFO),
                libc::sched_get_priority_max(libc::SCHED_FIFO),
            )
        };
        let (min, max) = if min < 0 || max < 0 { (1, 99) } else { (min, max) };
        let p = prio.unwrap_or(max).clamp(min, max);
        let param = libc::sched_param { sched_priority: p };
        // SAFETY: `param` outlives the call; pid 0 is the calling process.
        super::os_result(unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) })
            .map_err(|e| eyre::eyre!("{e}; hint: needs CAP_SYS_NICE or root"))?;
        Ok(p)
    }

    pub fn pin_to_cpu(cpu: usize) -> eyre::Result<()> {
        if cpu >= CPUSET_BITS {
            eyre::bail!("CPU {cpu} exceeds cpu_set_t capacity {CPUSET_BITS}");
        }
        let size = std::mem::size_of::<libc::cpu_set_t>();
        // SAFETY: cpu_set_t is plain data; zeroed is its empty set, and the
        // CPU_* helpers only touch bits below CPUSET_BITS.
        unsafe {
            let mut allowed: libc::cpu_set_t = std::mem::zeroed();
            super::os_result(libc::sched_getaffinity(0, size, &mut allowed))?;
            if !libc::CPU_ISSET(cpu, &allowed) {
                eyre::bail!("CPU {cpu} is not permitted by the current affinity mask");
            }
            let mut wanted: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_SET(cpu, &mut wanted);
            super::os_result(libc::sched_setaffinity(0, size, &wanted))?;
        }
        Ok(())
    }
}
