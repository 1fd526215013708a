//! Human-readable memory-size formatting for log lines and drivers.

const UNITS: [(u64, &str); 4] = [(1 << 30, "GB"), (1 << 20, "MB"), (1 << 10, "KB"), (1, "B")];

/// Breaks a byte count into GB/MB/KB/B components, omitting zero components.
///
/// ```rust
/// use growmap::format_memory_size;
///
/// assert_eq!("0B", format_memory_size(0));
/// assert_eq!("8KB", format_memory_size(8192));
/// assert_eq!("2GB;512MB", format_memory_size((2 << 30) + (512 << 20)));
/// ```
pub fn format_memory_size(size: u64) -> String {
  if size == 0 {
    return "0B".to_string();
  }

  let mut out = String::with_capacity(24);
  let mut rem = size;

  for (divisor, unit) in UNITS {
    let quotient = rem / divisor;
    rem %= divisor;

    if quotient != 0 {
      if !out.is_empty() {
        out.push(';');
      }
      out.push_str(&quotient.to_string());
      out.push_str(unit);
    }
  }

  out
}
