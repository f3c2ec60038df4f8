use clap::{App, Arg, SubCommand};
use monet::{ChannelConfig, ChannelManager, FlowKey, MsgBufBatch, Result};

fn main() -> Result<()> {
    env_logger::init();

    let matches = App::new("monet-cli")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Monet shared memory channel tool")
        .subcommand(
            SubCommand::with_name("create")
                .about("Create a channel and print its geometry")
                .arg(
                    Arg::with_name("name")
                        .short("n")
                        .long("name")
                        .value_name("NAME")
                        .help("Name of the channel")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("engine-slots")
                        .long("engine-slots")
                        .value_name("N")
                        .help("Slots on the engine→app ring (power of 2)")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("app-slots")
                        .long("app-slots")
                        .value_name("N")
                        .help("Slots on the app→engine ring (power of 2)")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("buf-slots")
                        .long("buf-slots")
                        .value_name("N")
                        .help("Buffers in the pool (power of 2)")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("mss")
                        .long("mss")
                        .value_name("BYTES")
                        .help("Usable payload bytes per buffer")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("no-huge")
                        .long("no-huge")
                        .help("Skip the huge page attempt"),
                ),
        )
        .subcommand(
            SubCommand::with_name("probe")
                .about("Create a scratch channel and run a loopback message through it"),
        )
        .get_matches();

    match matches.subcommand() {
        ("create", Some(sub)) => {
            let mut config = ChannelConfig::new(sub.value_of("name").unwrap());
            if let Some(v) = sub.value_of("engine-slots") {
                config.engine_ring_slots = parse(v, "engine-slots")?;
            }
            if let Some(v) = sub.value_of("app-slots") {
                config.app_ring_slots = parse(v, "app-slots")?;
            }
            if let Some(v) = sub.value_of("buf-slots") {
                config.buf_ring_slots = parse(v, "buf-slots")?;
            }
            if let Some(v) = sub.value_of("mss") {
                config.buf_mss = parse(v, "mss")?;
            }
            if sub.is_present("no-huge") {
                config.prefer_huge_pages = false;
            }
            create(config)
        }
        ("probe", Some(_)) => probe(),
        _ => {
            eprintln!("No subcommand given; try --help");
            Ok(())
        }
    }
}

fn parse(value: &str, param: &str) -> Result<u32> {
    value
        .parse()
        .map_err(|_| monet::MonetError::invalid_parameter(param, "expected an unsigned integer"))
}

fn create(config: ChannelConfig) -> Result<()> {
    let manager = ChannelManager::new();
    let channel = manager.add_channel(config)?;

    println!("channel:         {}", channel.name());
    println!("region size:     {} bytes", channel.size());
    println!(
        "backing:         {}",
        if channel.is_posix_shm() {
            "posix shm"
        } else {
            "huge pages"
        }
    );
    println!("fd:              {}", channel.fd());
    println!("total buffers:   {}", channel.total_buf_count());
    println!("free buffers:    {}", channel.free_buf_count());
    println!("usable buf size: {} bytes", channel.usable_buf_size());
    println!("total buf size:  {} bytes", channel.total_buf_size());
    Ok(())
}

fn probe() -> Result<()> {
    let name = format!("monet_probe_{}", std::process::id());
    let manager = ChannelManager::new();
    let channel = manager.add_channel(
        ChannelConfig::new(&name).with_huge_pages(false),
    )?;

    let payload = b"monet probe message";
    let head = channel.build_chain(payload, FlowKey::default())?;
    if channel.enqueue_messages(&[head]) != 1 {
        channel.free_chain(head)?;
        return Err(monet::MonetError::ring_full("engine_ring"));
    }

    let mut batch = MsgBufBatch::new();
    if channel.app_recv_messages(&mut batch) != 1 {
        return Err(monet::MonetError::corrupted(
            "probe message did not arrive on the engine→app ring",
        ));
    }

    let mut echoed = Vec::new();
    channel.read_chain(batch.slots()[0], &mut echoed)?;
    channel.free_chain(batch.slots()[0])?;
    if echoed != payload {
        return Err(monet::MonetError::corrupted(
            "probe payload did not survive the round trip",
        ));
    }

    println!("probe ok: {} bytes round-tripped on {}", echoed.len(), name);
    println!("stats: {:?}", channel.stats().snapshot());
    manager.destroy_channel(&name)?;
    Ok(())
}
