/// Interactive shell: a read-eval-print loop running as a kernel thread.
///
/// Input comes from the PS/2 keyboard queue; output goes to the serial
/// console. The command set covers every public kernel surface, which
/// makes the shell double as a manual test bench.

extern crate alloc;

use alloc::string::String;
use alloc::vec;

use crate::config;
use crate::error::KernelError;
use crate::interrupts::{ticks, TICK_HZ};
use crate::ipc;
use crate::keyboard;
use crate::klog;
use crate::ramfs;
use crate::task::scheduler;
use crate::task::{Pid, SchedPolicy};
use crate::{print, println};

const MAX_CMD_LEN: usize = 256;
const PROMPT: &str = "ferrite> ";

pub fn shell_thread() {
    let mut input = String::with_capacity(MAX_CMD_LEN);

    println!();
    println!("ferrite kernel shell");
    println!("Type 'help' to list commands.");
    print!("{}", PROMPT);

    loop {
        let c = match keyboard::poll_char() {
            Some(c) => c,
            None => {
                scheduler::sleep(1);
                continue;
            }
        };

        match c {
            '\n' => {
                println!();
                execute(&input);
                input.clear();
                print!("{}", PROMPT);
            }
            '\u{8}' => {
                if input.pop().is_some() {
                    print!("\u{8} \u{8}");
                }
            }
            c if c.is_ascii() && !c.is_control() => {
                if input.len() < MAX_CMD_LEN {
                    input.push(c);
                    print!("{}", c);
                }
            }
            _ => {}
        }
    }
}

fn execute(line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let (command, args) = match line.split_once(' ') {
        Some((c, a)) => (c, a.trim()),
        None => (line, ""),
    };

    match command {
        "help" => cmd_help(),
        "echo" => println!("{}", args),
        "clear" => print!("\x1b[2J\x1b[H"),
        "info" => cmd_info(),
        "uptime" => cmd_uptime(),
        "ps" => cmd_ps(),
        "spawn" => cmd_spawn(args),
        "sleep" => cmd_sleep(args),
        "sched" => cmd_sched(args),
        "send" => cmd_send(args),
        "grant" => cmd_grant(args),
        "caps" => cmd_caps(args),
        "shares" => cmd_shares(),
        "channels" => cmd_channels(),
        "klog" => cmd_klog(args),
        "loglevel" => cmd_loglevel(args),
        "ls" => cmd_ls(),
        "cat" => cmd_cat(args),
        "write" => cmd_write(args),
        "touch" => cmd_touch(args),
        "rm" => cmd_rm(args),
        "halt" => {
            println!("Halting CPU...");
            crate::hlt_loop();
        }
        "panic" => panic!("user-triggered panic"),
        _ => {
            println!("Unknown command: {}", command);
            println!("Type 'help' to list commands.");
        }
    }
}

fn cmd_help() {
    println!("Available commands:");
    println!("  help                  - this list");
    println!("  echo <text>           - print text");
    println!("  clear                 - clear the screen");
    println!("  info                  - kernel and heap info");
    println!("  uptime                - ticks since boot");
    println!("  ps                    - list threads");
    println!("  spawn <n>             - start n demo workers");
    println!("  sleep <ticks>         - put the shell to sleep");
    println!("  sched <pid> fair [weight]        - set FAIR policy");
    println!("  sched <pid> deadline <ticks>     - set DEADLINE policy");
    println!("  send <pid> <text>     - mailbox send");
    println!("  grant <owner> <peer> <srh>       - grant capabilities");
    println!("  caps <owner> <peer>   - query capabilities");
    println!("  shares                - list shared regions");
    println!("  channels              - list message channels");
    println!("  klog [n]              - dump recent kernel log entries");
    println!("  loglevel [level]      - show or set log verbosity");
    println!("  ls / cat / write / touch / rm    - RAM filesystem");
    println!("  halt, panic");
}

fn cmd_info() {
    let (used, free) = crate::allocator::stats();
    let (frames_used, frames_usable) = crate::memory::frame_stats();
    println!("ferrite kernel v{}", env!("CARGO_PKG_VERSION"));
    println!("Architecture: x86_64, {} Hz tick", TICK_HZ);
    println!("Heap: {} KiB used, {} KiB free", used / 1024, free / 1024);
    println!("Frames: {} of {} usable mapped", frames_used, frames_usable);
    println!("Threads active: {}", scheduler::thread_count());
}

fn cmd_uptime() {
    let t = ticks();
    println!("{} ticks ({}.{:02} s)", t, t / TICK_HZ as u64, t % TICK_HZ as u64);
}

fn cmd_ps() {
    println!("PID  STATE    KIND  PRI  POLICY    WEIGHT  VRUN  SLICE  STACK");
    for info in scheduler::snapshot() {
        let kind = match info.kind {
            crate::task::ThreadKind::User => 'U',
            crate::task::ThreadKind::Kernel => 'K',
        };
        println!(
            "{:<4} {:<8} {}     {}/{}  {:<8}  {:<6}  {:<4}  {}/{}  {}",
            info.pid,
            info.state,
            kind,
            info.base_priority,
            info.dynamic_priority,
            info.policy,
            info.weight,
            info.vruntime,
            info.slice_remaining,
            info.slice_ticks,
            info.stack_size,
        );
    }
}

/// Demo worker used by `spawn`: a few noisy rounds of sleep and yield.
fn demo_worker() {
    let pid = scheduler::current_pid().unwrap_or(-1);
    for round in 1..=5 {
        println!("[worker {}] round {}/5", pid, round);
        if round % 2 == 0 {
            scheduler::yield_now();
        } else {
            scheduler::sleep(20);
        }
    }
    println!("[worker {}] done", pid);
}

fn cmd_spawn(args: &str) {
    let count: usize = match args.parse() {
        Ok(n) if n > 0 => n,
        _ => {
            println!("Usage: spawn <count>");
            return;
        }
    };

    let mut created = 0;
    for _ in 0..count {
        match scheduler::create_user(demo_worker, 0) {
            Ok(pid) => {
                created += 1;
                println!("spawned worker pid {}", pid);
            }
            Err(err) => {
                println!("spawn: {}", err);
                break;
            }
        }
    }
    println!("spawn: created {} of {}", created, count);
}

fn cmd_sleep(args: &str) {
    let t: u32 = match args.parse() {
        Ok(t) => t,
        Err(_) => {
            println!("Usage: sleep <ticks>");
            return;
        }
    };
    let before = ticks();
    scheduler::sleep(t);
    println!("slept {} ticks", ticks() - before);
}

fn cmd_sched(args: &str) {
    let mut parts = args.split_whitespace();
    let (pid, policy) = match (parts.next(), parts.next()) {
        (Some(pid), Some(policy)) => (pid, policy),
        _ => {
            println!("Usage: sched <pid> fair [weight] | sched <pid> deadline <ticks>");
            return;
        }
    };
    let pid: Pid = match pid.parse() {
        Ok(pid) => pid,
        Err(_) => {
            println!("sched: bad pid");
            return;
        }
    };
    let arg: u64 = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);

    let result = match policy {
        "fair" => scheduler::set_scheduler(pid, SchedPolicy::Fair, arg as u32, 0),
        "deadline" => scheduler::set_scheduler(pid, SchedPolicy::Deadline, 0, arg),
        _ => Err(KernelError::Invalid),
    };
    match result {
        Ok(()) => println!("sched: pid {} -> {}", pid, policy),
        Err(err) => println!("sched: {}", err),
    }
}

fn cmd_send(args: &str) {
    let (pid, text) = match args.split_once(' ') {
        Some((pid, text)) => (pid, text),
        None => {
            println!("Usage: send <pid> <text>");
            return;
        }
    };
    let pid: Pid = match pid.parse() {
        Ok(pid) => pid,
        Err(_) => {
            println!("send: bad pid");
            return;
        }
    };
    match ipc::send(pid, text.as_bytes()) {
        Ok(n) => println!("sent {} bytes to pid {}", n, pid),
        Err(err) => println!("send: {}", err),
    }
}

fn parse_rights(s: &str) -> Option<u32> {
    let mut rights = 0;
    for c in s.chars() {
        rights |= match c {
            's' => ipc::RIGHT_SEND,
            'r' => ipc::RIGHT_RECV,
            'h' => ipc::RIGHT_SHARE,
            _ => return None,
        };
    }
    if rights == 0 {
        None
    } else {
        Some(rights)
    }
}

fn rights_letters(rights: u32) -> String {
    let mut s = String::new();
    if rights & ipc::RIGHT_SEND != 0 {
        s.push('s');
    }
    if rights & ipc::RIGHT_RECV != 0 {
        s.push('r');
    }
    if rights & ipc::RIGHT_SHARE != 0 {
        s.push('h');
    }
    if s.is_empty() {
        s.push('-');
    }
    s
}

fn cmd_grant(args: &str) {
    let parts: vec::Vec<&str> = args.split_whitespace().collect();
    if parts.len() != 3 {
        println!("Usage: grant <owner> <peer> <rights: s|r|h>");
        return;
    }
    let (owner, peer) = match (parts[0].parse::<Pid>(), parts[1].parse::<Pid>()) {
        (Ok(o), Ok(p)) => (o, p),
        _ => {
            println!("grant: bad pid");
            return;
        }
    };
    let rights = match parse_rights(parts[2]) {
        Some(r) => r,
        None => {
            println!("grant: rights are letters from s (send), r (recv), h (share)");
            return;
        }
    };
    match ipc::cap_grant(owner, peer, rights) {
        Ok(()) => println!("granted {} on {} -> {}", rights_letters(rights), owner, peer),
        Err(err) => println!("grant: {}", err),
    }
}

fn cmd_caps(args: &str) {
    let parts: vec::Vec<&str> = args.split_whitespace().collect();
    if parts.len() != 2 {
        println!("Usage: caps <owner> <peer>");
        return;
    }
    let (owner, peer) = match (parts[0].parse::<Pid>(), parts[1].parse::<Pid>()) {
        (Ok(o), Ok(p)) => (o, p),
        _ => {
            println!("caps: bad pid");
            return;
        }
    };
    match ipc::cap_query(owner, peer) {
        Ok(rights) => println!("{} -> {}: {}", owner, peer, rights_letters(rights)),
        Err(err) => println!("caps: {}", err),
    }
}

fn cmd_shares() {
    let shares = ipc::share::snapshot();
    if shares.is_empty() {
        println!("no shared regions");
        return;
    }
    println!("ID  OWNER  TARGET  ADDR              PAGES");
    for s in shares {
        println!(
            "{:<3} {:<6} {:<7} {:#016x}  {}",
            s.id, s.owner, s.target, s.addr, s.pages
        );
    }
}

fn cmd_channels() {
    println!("ID  NAME                  FLAGS  QUEUED  SUBS");
    for ch in ipc::channel::snapshot() {
        println!(
            "{:<3} {:<21} {:#05x}  {:<6}  {}",
            ch.id, ch.name, ch.flags, ch.queued, ch.subscribers
        );
    }
}

fn cmd_klog(args: &str) {
    let max: usize = args.parse().unwrap_or(config::KLOG_CAPACITY);
    let entries = klog::tail(max);
    if entries.is_empty() {
        println!("klog: no entries");
        return;
    }
    for entry in entries {
        println!("{:>4} [{:5}] {}", entry.seq, entry.level.name(), entry.text);
    }
}

fn cmd_loglevel(args: &str) {
    if args.is_empty() {
        println!("log level: {}", klog::level().name());
        return;
    }
    match klog::LogLevel::from_name(args) {
        Some(level) => {
            klog::set_level(level);
            println!("log level set to {}", level.name());
        }
        None => println!("Usage: loglevel [debug|info|warn|error]"),
    }
}

fn cmd_ls() {
    let files = ramfs::list();
    if files.is_empty() {
        println!("(empty)");
        return;
    }
    for (name, size) in files {
        println!("{:<20} {} bytes", name, size);
    }
}

fn cmd_cat(args: &str) {
    if args.is_empty() {
        println!("Usage: cat <file>");
        return;
    }
    match ramfs::read(args) {
        Ok(data) => match core::str::from_utf8(&data) {
            Ok(text) => println!("{}", text),
            Err(_) => println!("<{} bytes of binary data>", data.len()),
        },
        Err(err) => println!("cat: {}", err),
    }
}

fn cmd_write(args: &str) {
    let (name, text) = match args.split_once(' ') {
        Some((n, t)) => (n, t),
        None => {
            println!("Usage: write <file> <text>");
            return;
        }
    };
    match ramfs::write(name, text.as_bytes()) {
        Ok(()) => println!("wrote {} bytes", text.len()),
        Err(err) => println!("write: {}", err),
    }
}

fn cmd_touch(args: &str) {
    if args.is_empty() {
        println!("Usage: touch <file>");
        return;
    }
    if let Err(err) = ramfs::touch(args) {
        println!("touch: {}", err);
    }
}

fn cmd_rm(args: &str) {
    if args.is_empty() {
        println!("Usage: rm <file>");
        return;
    }
    if let Err(err) = ramfs::remove(args) {
        println!("rm: {}", err);
    }
}
