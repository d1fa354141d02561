//! Interactive shell over a blockfs container: `ls`, `cd`, `mkdir`, `touch`, `cat`,
//! `write`, `rm`, `pwd`, `stat`, `exit`. One `DirectoryHandle` is held as the current
//! working directory and passed explicitly to every `Filesystem` call, matching the
//! library's "no global state" design.

use std::io::{self, Write as _};
use std::path::PathBuf;

use blockfs::{BlockDevice, DirectoryHandle, Filesystem};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "blockfs-shell", about = "Interactive shell for a blockfs container")]
struct Args {
    /// Path to an existing container file.
    container: PathBuf,

    /// Number of data blocks the container was formatted with.
    #[arg(short = 'b', long, default_value_t = 4096)]
    blocks: u32,
}

struct Shell {
    fs: Filesystem,
    cwd: DirectoryHandle,
    path: Vec<String>,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let device = match BlockDevice::open(&args.container, args.blocks) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("blockfs-shell: {e}");
            std::process::exit(1);
        }
    };
    let (fs, cwd) = match Filesystem::init(device) {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("blockfs-shell: {e}");
            std::process::exit(1);
        }
    };

    let mut shell = Shell { fs, cwd, path: Vec::new() };
    shell.run();
}

impl Shell {
    fn prompt(&self) -> String {
        if self.path.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", self.path.join("/"))
        }
    }

    fn run(&mut self) {
        let stdin = io::stdin();
        loop {
            print!("{}> ", self.prompt());
            io::stdout().flush().ok();

            let mut line = String::new();
            if stdin.read_line(&mut line).unwrap_or(0) == 0 {
                break;
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut words = line.split_whitespace();
            let cmd = words.next().unwrap_or("");
            let rest: Vec<&str> = words.collect();

            let result = match cmd {
                "ls" => self.cmd_ls(),
                "cd" => self.cmd_cd(rest.first().copied().unwrap_or("/")),
                "pwd" => {
                    println!("{}", self.prompt());
                    Ok(())
                }
                "mkdir" => self.cmd_mkdir(&rest),
                "touch" => self.cmd_touch(&rest),
                "cat" => self.cmd_cat(&rest),
                "write" => self.cmd_write(&rest),
                "rm" => self.cmd_rm(&rest),
                "exit" | "quit" => break,
                "help" => {
                    println!("ls cd mkdir touch cat write rm pwd exit");
                    Ok(())
                }
                other => {
                    println!("unknown command: {other}");
                    Ok(())
                }
            };
            if let Err(e) = result {
                println!("error: {e}");
            }
        }
        self.fs.flush().ok();
    }

    fn cmd_ls(&mut self) -> blockfs::Result<()> {
        for name in self.fs.read_dir(&self.cwd)? {
            println!("{name}");
        }
        Ok(())
    }

    fn cmd_cd(&mut self, name: &str) -> blockfs::Result<()> {
        self.fs.change_dir(&mut self.cwd, name)?;
        match name {
            "." => {}
            ".." => {
                self.path.pop();
            }
            "/" => self.path.clear(),
            _ => self.path.push(name.to_string()),
        }
        Ok(())
    }

    fn cmd_mkdir(&mut self, args: &[&str]) -> blockfs::Result<()> {
        let name = match args.first() {
            Some(n) => n,
            None => {
                println!("usage: mkdir <name>");
                return Ok(());
            }
        };
        self.fs.mkdir(&mut self.cwd, name)
    }

    fn cmd_touch(&mut self, args: &[&str]) -> blockfs::Result<()> {
        let name = match args.first() {
            Some(n) => n,
            None => {
                println!("usage: touch <name>");
                return Ok(());
            }
        };
        let fh = self.fs.create_file(&mut self.cwd, name)?;
        self.fs.close(fh)
    }

    fn cmd_cat(&mut self, args: &[&str]) -> blockfs::Result<()> {
        let name = match args.first() {
            Some(n) => n,
            None => {
                println!("usage: cat <name>");
                return Ok(());
            }
        };
        let mut fh = self.fs.open_file(&self.cwd, name)?;
        let mut buf = vec![0u8; fh.size() as usize];
        self.fs.read(&mut fh, &mut buf)?;
        io::stdout().write_all(&buf).ok();
        println!();
        self.fs.close(fh)
    }

    fn cmd_write(&mut self, args: &[&str]) -> blockfs::Result<()> {
        if args.len() < 2 {
            println!("usage: write <name> <text...>");
            return Ok(());
        }
        let name = args[0];
        let text = args[1..].join(" ");
        let mut fh = match self.fs.open_file(&self.cwd, name) {
            Ok(fh) => fh,
            Err(blockfs::FsError::NotFound(_)) => self.fs.create_file(&mut self.cwd, name)?,
            Err(e) => return Err(e),
        };
        let n = self.fs.write(&mut fh, text.as_bytes())?;
        println!("wrote {n} bytes");
        self.fs.close(fh)
    }

    fn cmd_rm(&mut self, args: &[&str]) -> blockfs::Result<()> {
        let name = match args.first() {
            Some(n) => n,
            None => {
                println!("usage: rm <name>");
                return Ok(());
            }
        };
        self.fs.remove(&mut self.cwd, name)
    }
}
