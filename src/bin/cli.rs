//! Administration tool for shmcomm segments
//!
//! Crashed producers leave orphaned segments behind on platforms
//! without kernel-side cleanup; this tool lists, inspects and removes
//! them.

use std::time::Duration;

use clap::{App, Arg, SubCommand};
use shmcomm::{force_unlink, list_segments, Result, Segment};

fn main() -> Result<()> {
    env_logger::init();

    let matches = App::new("shmcomm-cli")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Inspect and clean up shmcomm shared memory segments")
        .subcommand(SubCommand::with_name("list").about("List all shmcomm segments on this host"))
        .subcommand(
            SubCommand::with_name("unlink")
                .about("Forcibly unlink a segment by its full OS-level name")
                .arg(
                    Arg::with_name("name")
                        .value_name("NAME")
                        .help("Segment name, e.g. shmcomm_pub_sensors")
                        .required(true)
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("stat")
                .about("Print ring counters of an existing segment")
                .arg(
                    Arg::with_name("name")
                        .value_name("NAME")
                        .help("Segment name, e.g. shmcomm_push_jobs")
                        .required(true)
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("clean").about("Unlink every shmcomm segment on this host"),
        )
        .get_matches();

    match matches.subcommand() {
        ("list", _) => {
            let segments = list_segments();
            if segments.is_empty() {
                println!("no shmcomm segments found");
            } else {
                for name in segments {
                    println!("{}", name);
                }
            }
        }
        ("unlink", Some(sub)) => {
            let name = sub.value_of("name").unwrap_or_default();
            if force_unlink(name) {
                println!("unlinked '{}'", name);
            } else {
                println!("no segment named '{}'", name);
            }
        }
        ("stat", Some(sub)) => {
            let name = sub.value_of("name").unwrap_or_default();
            let segment = Segment::attach(name, Duration::from_millis(500))?;
            let stats = segment.header().stats();
            println!("segment:    {}", name);
            println!("num_slots:  {}", stats.num_slots);
            println!("slot_size:  {}", stats.slot_size);
            println!("head:       {}", stats.head);
            println!("tail:       {}", stats.tail);
            println!("msg_count:  {}", stats.msg_count);
            println!("drop_count: {}", stats.drop_count);
            println!("used/free:  {}/{}", stats.used_slots, stats.free_slots);
        }
        ("clean", _) => {
            let mut removed = 0;
            for name in list_segments() {
                if force_unlink(&name) {
                    println!("unlinked '{}'", name);
                    removed += 1;
                }
            }
            println!("{} segment(s) removed", removed);
        }
        _ => {
            println!("no subcommand given; try --help");
        }
    }

    Ok(())
}
