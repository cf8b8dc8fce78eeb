// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use serde::{Deserialize, Serialize};

const KBYTE: u64 = 1024;

/// Counters that outgrow a report word read as `u32::MAX`.
fn saturate(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

fn micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

/// Throughput measured by the user-space stream layer and reported back to the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamThroughput {
    pub write_us: u32,
    pub write_kb: u32,
    pub read_us: u32,
    pub read_kb: u32,
}

/// Data moved through a device since the counters were last read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Throughput {
    tx_us: u64,
    tx_bytes: u64,
    rx_us: u64,
    rx_bytes: u64,
    stream: StreamThroughput,
}

impl Throughput {
    pub fn record_tx(&mut self, bytes: usize, elapsed: Duration) {
        self.tx_bytes = self.tx_bytes.saturating_add(bytes as u64);
        self.tx_us = self.tx_us.saturating_add(micros(elapsed));
    }

    pub fn record_rx(&mut self, bytes: usize, elapsed: Duration) {
        self.rx_bytes = self.rx_bytes.saturating_add(bytes as u64);
        self.rx_us = self.rx_us.saturating_add(micros(elapsed));
    }

    pub fn report_stream(&mut self, stream: StreamThroughput) {
        self.stream = stream;
    }

    /// The counters as the throughput feature reports them, then zero every counter.
    pub fn take_words(&mut self) -> [u32; 8] {
        let words = [
            saturate(self.tx_us),
            saturate(self.tx_bytes / KBYTE),
            saturate(self.rx_us),
            saturate(self.rx_bytes / KBYTE),
            self.stream.write_us,
            self.stream.write_kb,
            self.stream.read_us,
            self.stream.read_kb,
        ];
        *self = Self::default();
        words
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn take_resets() {
        let mut throughput = Throughput::default();
        throughput.record_tx(4096, Duration::from_micros(10));
        throughput.record_tx(1024, Duration::from_micros(5));
        throughput.record_rx(2048, Duration::from_micros(7));
        throughput.report_stream(StreamThroughput {
            write_us: 1,
            write_kb: 2,
            read_us: 3,
            read_kb: 4,
        });

        assert_eq!(throughput.take_words(), [15, 5, 7, 2, 1, 2, 3, 4]);
        assert_eq!(throughput.take_words(), [0; 8]);
    }

    #[test]
    fn long_runs_saturate_instead_of_wrapping() {
        let mut throughput = Throughput::default();
        throughput.record_tx(1024, Duration::from_secs(5_000));
        throughput.record_rx(usize::MAX, Duration::from_micros(1));
        throughput.record_rx(usize::MAX, Duration::from_micros(1));

        let words = throughput.take_words();
        assert_eq!(words[0], u32::MAX);
        assert_eq!(words[1], 1);
        assert_eq!(words[2], 2);
        assert_eq!(words[3], u32::MAX);
    }
}
