//! Pass timing.
//!
//! Each pass body holds a scope token for its duration:
//!
//! ```ignore
//! let _tt = timing::domtree();
//! ```
//!
//! Accumulated times can be printed with [`take_report`]. The bookkeeping is
//! thread-local; the core is single-threaded cooperative, so this is just a
//! way of keeping the accounting out of every signature.

use std::cell::RefCell;
use std::time::{Duration, Instant};

const N_PASSES: usize = 12;

static PASS_NAMES: [&str; N_PASSES] = [
    "blockgraph",
    "domtree",
    "postdomtree",
    "looptree",
    "cdep",
    "cgana",
    "liveness",
    "spill",
    "color",
    "copyopt",
    "ssa_destruction",
    "schedule",
];

thread_local! {
    static TOTALS: RefCell<[Duration; N_PASSES]> = RefCell::new([Duration::from_secs(0); N_PASSES]);
}

/// A running pass timer; the elapsed time is booked when it drops.
pub struct TimingToken {
    pass: usize,
    start: Instant,
}

impl Drop for TimingToken {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        TOTALS.with(|t| t.borrow_mut()[self.pass] += elapsed);
    }
}

fn start(pass: usize) -> TimingToken {
    TimingToken {
        pass,
        start: Instant::now(),
    }
}

macro_rules! pass_timers {
    ($($name:ident => $idx:expr;)*) => {
        $(
            /// Start timing this pass; drop the token to stop.
            pub fn $name() -> TimingToken {
                start($idx)
            }
        )*
    };
}

pass_timers! {
    blockgraph => 0;
    domtree => 1;
    postdomtree => 2;
    looptree => 3;
    cdep => 4;
    cgana => 5;
    liveness => 6;
    spill => 7;
    color => 8;
    copyopt => 9;
    ssa_destruction => 10;
    schedule => 11;
}

/// Render the accumulated pass times and reset the counters.
pub fn take_report() -> String {
    TOTALS.with(|t| {
        let mut totals = t.borrow_mut();
        let mut out = String::from("======== pass timings ========\n");
        for (name, d) in PASS_NAMES.iter().zip(totals.iter()) {
            out.push_str(&format!("{:<18} {:>10.3?}\n", name, d));
        }
        *totals = [Duration::from_secs(0); N_PASSES];
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_accumulate() {
        {
            let _t = domtree();
        }
        let report = take_report();
        assert!(report.contains("domtree"));
        // Counters reset after the report.
        let report2 = take_report();
        assert!(report2.contains("domtree"));
    }
}
