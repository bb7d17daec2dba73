//! msole command-line tool
//!
//! Inspect and edit OLE2 compound files.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use msole::{BlockPointer, Config, Container, EntryKind, OleError, StreamMode};
use tracing_subscriber::{fmt, EnvFilter};

/// msole
#[derive(Parser, Debug)]
#[command(name = "msole")]
#[command(about = "Inspect and edit OLE2 compound document files")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an empty container
    New {
        /// Container file
        file: PathBuf,
    },

    /// List the children of a storage
    Ls {
        /// Container file
        file: PathBuf,

        /// Storage path
        #[arg(default_value = "/")]
        path: String,

        /// Show kind, size, backing and CRC32 of each entry
        #[arg(short, long)]
        long: bool,
    },

    /// Print the whole storage tree
    Tree {
        /// Container file
        file: PathBuf,
    },

    /// Show details of one entry
    Stat {
        /// Container file
        file: PathBuf,

        /// Entry path
        path: String,
    },

    /// Copy a stream to stdout
    Cat {
        /// Container file
        file: PathBuf,

        /// Stream path
        path: String,
    },

    /// Copy a local file (or stdin with "-") into a new stream
    Put {
        /// Container file
        file: PathBuf,

        /// Stream path, missing storages are created
        path: String,

        /// Source file
        source: String,
    },

    /// Create a storage and any missing parents
    Mkdir {
        /// Container file
        file: PathBuf,

        /// Storage path
        path: String,
    },

    /// Remove a stream or an empty storage
    Rm {
        /// Container file
        file: PathBuf,

        /// Entry path
        path: String,
    },

    /// Check every chain and report usage
    Check {
        /// Container file
        file: PathBuf,
    },

    /// Dump the header and the big-block allocation table
    Blocks {
        /// Container file
        file: PathBuf,
    },
}

fn main() {
    // Logs go to stderr so `cat` output stays clean
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,msole=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args.command) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(command: Commands) -> msole::Result<()> {
    match command {
        Commands::New { file } => Container::create(&file)?.close(),

        Commands::Ls { file, path, long } => {
            let mut ole = open_read_only(&file)?;
            for entry in ole.list(&path)? {
                if !long {
                    println!("{}", entry.name);
                    continue;
                }
                match entry.kind {
                    EntryKind::Stream => {
                        let data = read_stream(&mut ole, entry.index)?;
                        let backing = msole::Backing::for_size(entry.size);
                        println!(
                            "stream   {:>10}  {:<5}  {:08x}  {}",
                            entry.size,
                            backing,
                            crc32fast::hash(&data),
                            entry.name
                        );
                    }
                    _ => println!("storage  {:>10}  {:<5}  {:8}  {}/", "-", "-", "", entry.name),
                }
            }
            ole.close()
        }

        Commands::Tree { file } => {
            let ole = open_read_only(&file)?;
            let root = ole.root()?;
            println!("{}", root.name);
            print_tree(&ole, root.index, 1)?;
            ole.close()
        }

        Commands::Stat { file, path } => {
            let ole = open_read_only(&file)?;
            let stat = ole.stat(&path)?;
            println!("index:    {}", stat.index);
            println!("name:     {}", stat.name);
            println!("kind:     {}", stat.kind);
            println!("size:     {}", stat.size);
            println!("start:    {}", BlockPointer::from(stat.start));
            if let Some(backing) = stat.backing {
                println!("backing:  {}", backing);
            } else {
                println!("children: {}", stat.children);
            }
            ole.close()
        }

        Commands::Cat { file, path } => {
            let mut ole = open_read_only(&file)?;
            let id = ole.open_path(&path, StreamMode::Read)?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            io::copy(&mut ole.io(id)?, &mut out)?;
            out.flush()?;
            ole.close_stream(id)?;
            ole.close()
        }

        Commands::Put { file, path, source } => {
            let mut ole = Container::open(&file)?;
            if ole.resolve(&path).is_ok() {
                return Err(OleError::AlreadyExists(path));
            }
            let id = ole.open_path(&path, StreamMode::Write)?;
            let written = if source == "-" {
                io::copy(&mut io::stdin().lock(), &mut ole.io(id)?)?
            } else {
                io::copy(&mut File::open(&source)?, &mut ole.io(id)?)?
            };
            ole.close_stream(id)?;
            tracing::info!(path = %path, bytes = written, "Stream written");
            ole.close()
        }

        Commands::Mkdir { file, path } => {
            let mut ole = Container::open(&file)?;
            ole.ensure_storage(&path)?;
            ole.close()
        }

        Commands::Rm { file, path } => {
            let mut ole = Container::open(&file)?;
            ole.remove_path(&path)?;
            ole.close()
        }

        Commands::Check { file } => {
            let ole = open_read_only(&file)?;
            let report = ole.verify()?;
            println!("storages:           {}", report.storages);
            println!("streams:            {}", report.streams);
            println!("stream bytes:       {}", report.stream_bytes);
            println!("big blocks in use:  {}", report.big_blocks_in_use);
            println!("small blocks in use: {}", report.small_blocks_in_use);
            println!("ok");
            ole.close()
        }

        Commands::Blocks { file } => {
            let ole = open_read_only(&file)?;
            let header = ole.header()?;
            println!("file blocks:      {}", ole.block_count());
            println!("table blocks:     {:?}", header.bat_list);
            println!("directory chain:  {:?}", ole.directory_blocks());
            println!("small table:      {:?}", ole.small_table_blocks());
            println!("small file:       {:?}", ole.small_file_blocks());
            for block in 0..ole.block_count().min(ole.block_capacity()) {
                println!("{:>6}  {}", block, ole.next_block(block)?);
            }
            ole.close()
        }
    }
}

fn open_read_only(file: &Path) -> msole::Result<Container> {
    Container::open_with(file, Config::builder().read_only(true).build())
}

fn read_stream(ole: &mut Container, index: u32) -> msole::Result<Vec<u8>> {
    let id = ole.open_stream(index, StreamMode::Read)?;
    let mut data = vec![0u8; ole.handle(id)?.size() as usize];
    ole.read(id, &mut data)?;
    ole.close_stream(id)?;
    Ok(data)
}

fn print_tree(ole: &Container, storage: u32, depth: usize) -> msole::Result<()> {
    for entry in ole.entries(storage)? {
        let indent = "  ".repeat(depth);
        match entry.kind {
            EntryKind::Stream => println!("{}{} ({} bytes)", indent, entry.name, entry.size),
            _ => {
                println!("{}{}/", indent, entry.name);
                print_tree(ole, entry.index, depth + 1)?;
            }
        }
    }
    Ok(())
}
