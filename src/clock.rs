//! System time from a wrapping microsecond tick

/// Time sources consumed by the log's owner
///
/// Only `micros` has to be monotonic, and only modulo 2³²; the RTC
/// value may jump whenever the clock is corrected.
pub trait TimeSource {
    /// Monotonic microsecond tick, wraps every ~71.6 minutes
    fn micros(&mut self) -> u32;

    /// Seconds since epoch
    fn utc(&mut self) -> u32;
}

/// Extends the 32-bit tick into a non-decreasing millisecond count
///
/// Wraps of the tick are detected by comparison with the previous
/// sample, so the result is only correct if the clock is polled at
/// least once per wrap period.
pub struct SystemClock<T> {
    source: T,
    /// Last tick sample, used to identify wrapping
    prev_ticks: u32,
    /// Microsecond overflow count
    high_ticks: u32,
}

impl<T: TimeSource> SystemClock<T> {
    pub fn new(source: T) -> Self {
        Self {
            source,
            prev_ticks: 0,
            high_ticks: 0,
        }
    }

    /// Milliseconds since boot
    pub fn system_time_ms(&mut self) -> u64 {
        let ticks = self.source.micros();
        if ticks < self.prev_ticks {
            self.high_ticks += 1;
        }
        self.prev_ticks = ticks;

        ((u64::from(self.high_ticks) << 32) | u64::from(ticks)) / 1000
    }

    /// Low word of the millisecond count, the form entries store
    pub fn system_time(&mut self) -> u32 {
        self.system_time_ms() as u32
    }

    pub fn utc(&mut self) -> u32 {
        self.source.utc()
    }
}

#[cfg(test)]
struct ScriptedSource {
    ticks: Vec<u32>,
    next: usize,
}

#[cfg(test)]
impl TimeSource for ScriptedSource {
    fn micros(&mut self) -> u32 {
        let ticks = self.ticks[self.next];
        self.next += 1;
        ticks
    }

    fn utc(&mut self) -> u32 {
        1_650_000_000
    }
}

#[test]
fn wrap_monotonicity_test() {
    let source = ScriptedSource {
        ticks: vec![0, 1_000_000, 4_000_000_000, 100, 1_000_000, 4_100_000_000, 50],
        next: 0,
    };
    let mut clock = SystemClock::new(source);

    let mut prev = 0;
    for _ in 0..7 {
        let now = clock.system_time_ms();
        assert!(now >= prev, "{} < {}", now, prev);
        prev = now;
    }

    // Two wraps were observed
    assert_eq!(prev, ((2u64 << 32) | 50) / 1000);
}

#[test]
fn millisecond_conversion_test() {
    let source = ScriptedSource {
        ticks: vec![5_000, 2_500_000],
        next: 0,
    };
    let mut clock = SystemClock::new(source);
    assert_eq!(clock.system_time_ms(), 5);
    assert_eq!(clock.system_time(), 2_500);
    assert_eq!(clock.utc(), 1_650_000_000);
}
