use std::time::Duration;

/// Timings and byte counts of round trips.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    pub total_time: Option<Duration>,
    pub encode_times: Vec<Duration>,
    pub decode_times: Vec<Duration>,
    pub write_times: Vec<Duration>,
    pub read_times: Vec<Duration>,
    pub files_processed: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_total_time(&mut self, duration: Duration) {
        self.total_time = Some(duration);
    }

    pub fn record_encode_time(&mut self, duration: Duration) {
        self.encode_times.push(duration);
    }

    pub fn record_decode_time(&mut self, duration: Duration) {
        self.decode_times.push(duration);
        self.files_processed += 1;
    }

    pub fn record_read_time(&mut self, duration: Duration) {
        self.read_times.push(duration);
    }

    pub fn record_write_time(&mut self, duration: Duration) {
        self.write_times.push(duration);
    }

    pub fn record_bytes_read(&mut self, bytes: u64) {
        self.bytes_read += bytes;
    }

    pub fn record_bytes_written(&mut self, bytes: u64) {
        self.bytes_written += bytes;
    }

    fn average(times: &[Duration]) -> Option<Duration> {
        if times.is_empty() {
            return None;
        }
        let total: Duration = times.iter().sum();
        Some(total / times.len() as u32)
    }

    pub fn average_encode_time(&self) -> Option<Duration> {
        Self::average(&self.encode_times)
    }

    pub fn average_decode_time(&self) -> Option<Duration> {
        Self::average(&self.decode_times)
    }

    pub fn average_read_time(&self) -> Option<Duration> {
        Self::average(&self.read_times)
    }

    pub fn average_write_time(&self) -> Option<Duration> {
        Self::average(&self.write_times)
    }

    pub fn print_summary(&self) {
        println!("\n=== Round Trip Results ===");

        if let Some(total_time) = self.total_time {
            println!("Total Time: {:?}", total_time);
        }

        println!("Files Processed: {}", self.files_processed);

        // Use KB for smaller values, MB for larger ones
        if self.bytes_written < 1024 * 1024 {
            println!("Bytes Written: {:.2} KB", self.bytes_written as f64 / 1024.0);
        } else {
            println!("Bytes Written: {:.2} MB", self.bytes_written as f64 / (1024.0 * 1024.0));
        }

        if self.bytes_read < 1024 * 1024 {
            println!("Bytes Read: {:.2} KB", self.bytes_read as f64 / 1024.0);
        } else {
            println!("Bytes Read: {:.2} MB", self.bytes_read as f64 / (1024.0 * 1024.0));
        }

        if let Some(avg) = self.average_encode_time() {
            println!("Average Encode Time: {:?}", avg);
        }

        if let Some(avg) = self.average_decode_time() {
            println!("Average Decode Time: {:?}", avg);
        }

        if let Some(avg) = self.average_write_time() {
            println!("Average Write Time: {:?}", avg);
        }

        if let Some(avg) = self.average_read_time() {
            println!("Average Read Time: {:?}", avg);
        }

        println!("==========================\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_and_counters() {
        let mut metrics = Metrics::new();
        assert!(metrics.average_decode_time().is_none());

        metrics.record_decode_time(Duration::from_millis(2));
        metrics.record_decode_time(Duration::from_millis(4));
        metrics.record_bytes_written(10);
        metrics.record_bytes_written(5);

        assert_eq!(metrics.average_decode_time(), Some(Duration::from_millis(3)));
        assert_eq!(metrics.files_processed, 2);
        assert_eq!(metrics.bytes_written, 15);
    }

    #[test]
    fn storage_timings_are_averaged() {
        let mut metrics = Metrics::new();
        assert!(metrics.average_read_time().is_none());
        assert!(metrics.average_write_time().is_none());

        metrics.record_write_time(Duration::from_millis(6));
        metrics.record_read_time(Duration::from_millis(1));
        metrics.record_read_time(Duration::from_millis(3));

        assert_eq!(metrics.average_write_time(), Some(Duration::from_millis(6)));
        assert_eq!(metrics.average_read_time(), Some(Duration::from_millis(2)));
    }
}
