//! Interactive driver for poking at a mapping manager from a shell.
//!
//! Creates a manager over `--file` and, with `--repl`, reads commands from
//! stdin:
//!
//! ```text
//!   map_next [grow_chunks]       map one more chunk; a positive grow_chunks
//!                                allows the reservation to grow by that many
//!   map_next_n <n>               map the next n chunks (growing as needed)
//!   map_until_ex <step>          map the remaining reserved chunks in steps
//!                                of <step>, then show the fully-mapped
//!                                rejection
//!   mapped_chunks                print the number of mapped chunks
//! ```
//!
//! Pair it with `pmap <pid>` or `/proc/<pid>/maps` in another terminal to
//! watch the reservation and the file-backed prefix evolve.
//!
//! Run with: `cargo run --example repl -- --file /tmp/growmap.bin --repl`

use std::io::{BufRead, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use growmap::{CreateOptions, MapError, MapNextOptions, MmapManager, format_memory_size};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "repl", about = "Interactive mapping-manager driver")]
struct Flags {
  /// Path to the backing file.
  #[arg(short, long)]
  file: PathBuf,

  /// Start an interactive command loop after creating the manager.
  #[arg(short, long, default_value_t = false)]
  repl: bool,
}

/// One parsed REPL command.
#[derive(Debug, Clone, Copy)]
enum ReplCommand {
  MapNext { grow_chunks: i64 },
  MapNextN { n: u64 },
  MapUntilExhausted { chunks_per_increment: u64 },
  MappedChunks,
}

fn parse_command(line: &str) -> Option<ReplCommand> {
  let mut tokens = line.split_whitespace();
  let head = tokens.next()?;

  let cmd = match head {
    "map_next" => {
      let grow_chunks = match tokens.next() {
        Some(tok) => match tok.parse() {
          Ok(n) => n,
          Err(_) => {
            error!(token = tok, "expected an integer grow_chunks argument");
            return None;
          }
        },
        None => 0,
      };
      ReplCommand::MapNext { grow_chunks }
    }

    "map_next_n" => match tokens.next().map(str::parse) {
      Some(Ok(n)) => ReplCommand::MapNextN { n },
      _ => {
        error!("expected a chunk count: map_next_n <n>");
        return None;
      }
    },

    "map_until_ex" => match tokens.next().map(str::parse) {
      Some(Ok(step)) if step > 0 => ReplCommand::MapUntilExhausted { chunks_per_increment: step },
      _ => {
        error!("expected a positive integer: map_until_ex <chunks_per_increment>");
        return None;
      }
    },

    "mapped_chunks" => ReplCommand::MappedChunks,

    other => {
      error!(command = other, "unknown command");
      return None;
    }
  };

  if let Some(trailing) = tokens.next() {
    error!(trailing, "expected end of line");
    return None;
  }

  Some(cmd)
}

/// Fills the most recently mapped `chunks` with a marker byte so the pages
/// are actually faulted in and visible in the backing file.
fn fill_tail_chunks(
  man: &mut MmapManager,
  chunks: u64,
) {
  let tail = (chunks * man.chunk_size()) as usize;
  let mapped = man.mapped_mut();
  let start = mapped.len() - tail;
  mapped[start..].fill(b'a');
}

fn do_map_next(
  man: &mut MmapManager,
  grow_chunks: i64,
) {
  let opts = MapNextOptions {
    dont_grow_if_fully_mapped: grow_chunks <= 0,
    extra_chunks_to_reserve_on_grow: grow_chunks.max(0) as u64,
    chunks_to_map_next: 1,
  };

  match man.map_next(opts) {
    Ok(res) => {
      fill_tail_chunks(man, 1);
      info!(
        mapping_was_moved = res.mapping_was_moved,
        file_extension = %format_memory_size(res.file_extension_size),
        mapped_chunks = man.num_chunks_mapped(),
        "mapped next chunk"
      );
    }
    Err(err) => {
      error!(code = ?err.code(), errno = err.saved_errno(), %err, "map_next failed");
    }
  }
}

fn do_map_next_n(
  man: &mut MmapManager,
  n: u64,
) {
  let opts = MapNextOptions {
    dont_grow_if_fully_mapped: false,
    extra_chunks_to_reserve_on_grow: 0,
    chunks_to_map_next: n,
  };

  match man.map_next(opts) {
    Ok(res) => {
      fill_tail_chunks(man, n);
      info!(
        mapping_was_moved = res.mapping_was_moved,
        mapped_chunks = man.num_chunks_mapped(),
        mapped = %format_memory_size(man.mapped_size()),
        "mapped next chunks"
      );
    }
    Err(err) => {
      error!(code = ?err.code(), errno = err.saved_errno(), %err, "map_next_n failed");
    }
  }
}

fn do_map_until_exhausted(
  man: &mut MmapManager,
  chunks_per_increment: u64,
) {
  let mut remaining = u64::from(man.num_chunks_reserved() - man.num_chunks_mapped());
  let increments = remaining.div_ceil(chunks_per_increment);
  info!(remaining, increments, "will map all remaining reserved chunks");

  while remaining > 0 {
    let step = remaining.min(chunks_per_increment);
    let opts = MapNextOptions {
      dont_grow_if_fully_mapped: true,
      extra_chunks_to_reserve_on_grow: 0,
      chunks_to_map_next: step,
    };

    if let Err(err) = man.map_next(opts) {
      error!(%err, "failed to map next increment");
      return;
    }

    remaining -= step;
    info!(remaining, "mapped increment");
  }

  info!(
    chunks = man.num_chunks_mapped(),
    size = %format_memory_size(man.mapped_size()),
    "mapped all reserved chunks"
  );

  // One more request must bounce off the full reservation.
  let opts = MapNextOptions {
    dont_grow_if_fully_mapped: true,
    extra_chunks_to_reserve_on_grow: 0,
    chunks_to_map_next: 1,
  };
  match man.map_next(opts) {
    Err(MapError::FullyMapped) => {
      info!("address space is full and growth is disallowed, as expected");
    }
    other => {
      error!(
        ?other,
        reserved_chunks = man.num_chunks_reserved(),
        mapped_chunks = man.num_chunks_mapped(),
        "expected the fully-mapped rejection"
      );
    }
  }
}

fn do_command(
  man: &mut MmapManager,
  cmd: ReplCommand,
) {
  match cmd {
    ReplCommand::MapNext { grow_chunks } => do_map_next(man, grow_chunks),
    ReplCommand::MapNextN { n } => do_map_next_n(man, n),
    ReplCommand::MapUntilExhausted { chunks_per_increment } => {
      do_map_until_exhausted(man, chunks_per_increment)
    }
    ReplCommand::MappedChunks => println!("mapped_chunks = {}", man.num_chunks_mapped()),
  }
}

/// Waits until the user presses ENTER. Useful when you want to inspect the
/// address space with tools like `pmap`, `htop` or `/proc/<pid>/maps`.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let flags = Flags::parse();
  info!(file = %flags.file.display(), "backing file");

  let mut man = MmapManager::create(&CreateOptions {
    backing_file: flags.file.clone(),
    initial_reserved_size: 0,
    reserve_existing_file_size: false,
  })
  .context("failed to create mapping manager")?;

  info!(
    pid = std::process::id(),
    reserved = %format_memory_size(man.reserved_size()),
    "created manager, pausing for input"
  );
  block_until_enter_pressed();

  if flags.repl {
    let prompt = format!("mmap:{}> ", std::process::id());
    let stdin = std::io::stdin();

    loop {
      print!("{prompt}");
      std::io::stdout().flush()?;

      let mut line = String::new();
      if stdin.lock().read_line(&mut line)? == 0 {
        break;
      }

      if let Some(cmd) = parse_command(&line) {
        do_command(&mut man, cmd);
      }
    }
  }

  man.close().context("failed to delete manager")?;
  Ok(())
}
