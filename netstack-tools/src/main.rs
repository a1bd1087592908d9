extern crate clap;
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};

use failure::{bail, format_err, Error};
use netstack::arp;
use netstack::ipv4::{Ipv4Layer, IPV4_MAX_PAYLOAD};
use netstack::rip::{RipClient, RipServer, RipTable};
use netstack::udp::{UdpSocket, UDP_MAX_PAYLOAD};
use netstack_afpacket::AfPacketLink;
use netstack_packets::{IpProtocol, RipEntry, RIP_MULTICAST_ADDR};
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::process;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

mod subscriber;
use crate::subscriber::StderrSubscriber;

/// How long `ipv4-client` waits for the echo.
const IPV4_REPLY_TIMEOUT: Duration = Duration::from_millis(2000);

/// Parses an unsigned number the way C's `strtol` does with base 0: `0x` prefix for hex, a
/// leading `0` for octal, decimal otherwise.
fn parse_number(text: &str) -> Result<u32, Error> {
    let parsed = if let Some(hex) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        u32::from_str_radix(hex, 16)
    } else if text.len() > 1 && text.starts_with('0') {
        u32::from_str_radix(&text[1..], 8)
    } else {
        text.parse()
    };
    parsed.map_err(|_| format_err!("invalid number {:?}", text))
}

fn parse_protocol(text: &str) -> Result<IpProtocol, Error> {
    let number = parse_number(text)?;
    if number > u32::from(u8::max_value()) {
        bail!("protocol {} does not fit in one byte", number);
    }
    Ok(IpProtocol::from(number as u8))
}

fn parse_len(text: &str, max: usize) -> Result<usize, Error> {
    let len = usize::from_str(text).map_err(|_| format_err!("invalid length {:?}", text))?;
    if len == 0 || len > max {
        bail!("length must be between 1 and {}", max);
    }
    Ok(len)
}

/// The test pattern the clients send: byte `i` holds `i` modulo 256.
fn payload_pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| i as u8).collect()
}

fn ip_arg(matches: &ArgMatches, name: &str) -> Result<Ipv4Addr, Error> {
    let text = required(matches, name)?;
    Ipv4Addr::from_str(text).map_err(|_| format_err!("invalid IPv4 address {:?}", text))
}

fn port_arg(matches: &ArgMatches, name: &str) -> Result<u16, Error> {
    let text = required(matches, name)?;
    u16::from_str(text).map_err(|_| format_err!("invalid port {:?}", text))
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str, Error> {
    matches
        .value_of(name)
        .ok_or_else(|| format_err!("missing argument <{}>", name))
}

fn timeout_arg(matches: &ArgMatches) -> Result<Option<Duration>, Error> {
    match matches.value_of("timeout") {
        None => Ok(None),
        Some(text) => {
            let ms = u64::from_str(text).map_err(|_| format_err!("invalid timeout {:?}", text))?;
            Ok(Some(Duration::from_millis(ms)))
        }
    }
}

fn open_link(interface: &str) -> io::Result<AfPacketLink> {
    AfPacketLink::open(interface)
}

fn open_rip_link(interface: &str) -> io::Result<AfPacketLink> {
    let link = AfPacketLink::open(interface)?;
    link.join_multicast(RIP_MULTICAST_ADDR)?;
    Ok(link)
}

fn open_ipv4(matches: &ArgMatches) -> Result<Ipv4Layer<AfPacketLink>, Error> {
    Ok(Ipv4Layer::open(
        required(matches, "config")?,
        required(matches, "routes")?,
        open_link,
    )?)
}

fn arp_command(matches: &ArgMatches) -> Result<(), Error> {
    let interface = required(matches, "iface")?;
    let target = ip_arg(matches, "ip")?;
    let link = open_link(interface)?;
    let mac = arp::resolve(&link, Ipv4Addr::UNSPECIFIED, target)?;
    println!("{} -> {}", target, mac);
    Ok(())
}

fn ipv4_client(matches: &ArgMatches) -> Result<(), Error> {
    let protocol = parse_protocol(required(matches, "protocol")?)?;
    let dest = ip_arg(matches, "ip")?;
    let len = parse_len(required(matches, "len")?, IPV4_MAX_PAYLOAD)?;
    let ip = open_ipv4(matches)?;

    let sent = ip.send(dest, protocol, &payload_pattern(len))?;
    println!("sent {} bytes to {}", sent, dest);

    let mut buf = [0u8; IPV4_MAX_PAYLOAD];
    match ip.recv(protocol, &mut buf, Some(IPV4_REPLY_TIMEOUT))? {
        Some((len, src)) => println!("received {} bytes from {}", len, src),
        None => println!("no reply"),
    }
    ip.close();
    Ok(())
}

fn ipv4_server(matches: &ArgMatches) -> Result<(), Error> {
    let protocol = parse_protocol(required(matches, "protocol")?)?;
    let ip = open_ipv4(matches)?;

    let mut buf = [0u8; IPV4_MAX_PAYLOAD];
    info!(addr = %ip.local_addr(), ?protocol, "waiting for a datagram");
    if let Some(received) = ip.recv_datagram(protocol, &mut buf, None)? {
        let src = received.src;
        println!("received {} bytes from {}", received.len, src);
        ip.send(src, protocol, &buf[..received.copied])?;
        println!("echoed {} bytes to {}", received.copied, src);
    }
    ip.close();
    Ok(())
}

fn udp_client(matches: &ArgMatches) -> Result<(), Error> {
    let dest = SocketAddrV4::new(ip_arg(matches, "ip")?, port_arg(matches, "remote-port")?);
    let len = parse_len(required(matches, "len")?, UDP_MAX_PAYLOAD)?;
    let socket = UdpSocket::new(open_ipv4(matches)?, port_arg(matches, "local-port")?);

    let sent = socket.send(dest, &payload_pattern(len))?;
    println!("sent {} bytes to {}", sent, dest);

    let mut buf = [0u8; UDP_MAX_PAYLOAD];
    if let Some((len, peer)) = socket.recv(&mut buf, timeout_arg(matches)?)? {
        println!("received {} bytes from {}", len, peer);
    } else {
        println!("no reply");
    }
    socket.close();
    Ok(())
}

fn udp_server(matches: &ArgMatches) -> Result<(), Error> {
    let socket = UdpSocket::new(open_ipv4(matches)?, port_arg(matches, "port")?);

    let mut buf = [0u8; UDP_MAX_PAYLOAD];
    info!(addr = %socket.local_addr(), "waiting for a datagram");
    if let Some((len, peer)) = socket.recv(&mut buf, None)? {
        let len = len.min(buf.len());
        println!("received {} bytes from {}", len, peer);
        socket.send(peer, &buf[..len])?;
        println!("echoed {} bytes to {}", len, peer);
    }
    socket.close();
    Ok(())
}

fn rip_server(matches: &ArgMatches) -> Result<(), Error> {
    let server = RipServer::open(
        required(matches, "config")?,
        required(matches, "routes")?,
        required(matches, "rip-routes")?,
        open_rip_link,
    )?;
    info!(addr = %server.socket().local_addr(), "RIP server started");
    server.run()?;
    Ok(())
}

fn print_route(route: &RipEntry) {
    println!(
        "subnet: {}, mask: {}, gw: {}, metric: {}",
        route.subnet, route.mask, route.next_hop, route.metric
    );
}

fn rip_client(matches: &ArgMatches) -> Result<(), Error> {
    let server = ip_arg(matches, "ip")?;
    let timeout = timeout_arg(matches)?;
    let client = RipClient::open(
        required(matches, "config")?,
        required(matches, "routes")?,
        open_rip_link,
    )?;

    let response = match matches.value_of("rip-routes") {
        Some(path) => client.request(server, RipTable::read(path)?.routes(), timeout)?,
        None => client.request_all(server, timeout)?,
    };
    match response {
        Some((from, message)) => {
            println!("{} routes from {}", message.entries.len(), from);
            message.entries.iter().for_each(print_route);
        }
        None => println!("no response"),
    }
    Ok(())
}

fn files<'a, 'b>(command: App<'a, 'b>) -> App<'a, 'b> {
    command
        .arg(
            Arg::with_name("config")
                .value_name("CONFIG_FILE")
                .help("Interface configuration: Interface, IPv4Address and SubnetMask")
                .required(true),
        )
        .arg(
            Arg::with_name("routes")
                .value_name("ROUTES_FILE")
                .help("Static routes: subnet mask gateway per line")
                .required(true),
        )
}

fn timeout<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name("timeout")
        .short("t")
        .long("timeout")
        .value_name("MS")
        .help("Give up waiting for a reply after this many milliseconds (default: wait forever)")
        .takes_value(true)
}

fn app<'a, 'b>() -> App<'a, 'b> {
    App::new("netstack")
        .version("0.1.0")
        .about("ARP, IPv4, UDP and RIPv2 over a raw Ethernet interface")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .multiple(true)
                .global(true)
                .help("Log more; repeat for more detail"),
        )
        .subcommand(
            SubCommand::with_name("arp")
                .about("Resolves the hardware address of an IPv4 neighbour")
                .arg(Arg::with_name("iface").value_name("IFACE").required(true))
                .arg(Arg::with_name("ip").value_name("IP").required(true)),
        )
        .subcommand(
            files(SubCommand::with_name("ipv4-client"))
                .about("Sends one IPv4 datagram and waits for the echo")
                .arg(
                    Arg::with_name("protocol")
                        .value_name("PROTOCOL")
                        .help("IP protocol number, decimal or 0x-prefixed hex")
                        .required(true),
                )
                .arg(Arg::with_name("ip").value_name("IP").required(true))
                .arg(Arg::with_name("len").value_name("LEN").required(true)),
        )
        .subcommand(
            files(SubCommand::with_name("ipv4-server"))
                .about("Waits for one IPv4 datagram and echoes it back")
                .arg(
                    Arg::with_name("protocol")
                        .value_name("PROTOCOL")
                        .help("IP protocol number, decimal or 0x-prefixed hex")
                        .required(true),
                ),
        )
        .subcommand(
            files(SubCommand::with_name("udp-client"))
                .about("Sends one UDP datagram and waits for the echo")
                .arg(Arg::with_name("ip").value_name("IP").required(true))
                .arg(Arg::with_name("local-port").value_name("LOCAL_PORT").required(true))
                .arg(Arg::with_name("remote-port").value_name("REMOTE_PORT").required(true))
                .arg(Arg::with_name("len").value_name("LEN").required(true))
                .arg(timeout()),
        )
        .subcommand(
            files(SubCommand::with_name("udp-server"))
                .about("Waits for one UDP datagram and echoes it back")
                .arg(Arg::with_name("port").value_name("PORT").required(true)),
        )
        .subcommand(
            files(SubCommand::with_name("rip-server"))
                .about("Runs a RIPv2 router")
                .arg(
                    Arg::with_name("rip-routes")
                        .value_name("RIP_ROUTES_FILE")
                        .help("Seed routes, rewritten as the table changes")
                        .required(true),
                ),
        )
        .subcommand(
            files(SubCommand::with_name("rip-client"))
                .about("Asks a RIPv2 router for its routes")
                .arg(
                    Arg::with_name("ip")
                        .value_name("IP")
                        .help("Router to ask, or 224.0.0.9 for every router")
                        .required(true),
                )
                .arg(
                    Arg::with_name("rip-routes")
                        .value_name("RIP_ROUTES_FILE")
                        .help("Only ask for these routes instead of the whole table"),
                )
                .arg(timeout()),
        )
}

fn run(matches: &ArgMatches) -> Result<(), Error> {
    match matches.subcommand() {
        ("arp", Some(sub)) => arp_command(sub),
        ("ipv4-client", Some(sub)) => ipv4_client(sub),
        ("ipv4-server", Some(sub)) => ipv4_server(sub),
        ("udp-client", Some(sub)) => udp_client(sub),
        ("udp-server", Some(sub)) => udp_server(sub),
        ("rip-server", Some(sub)) => rip_server(sub),
        ("rip-client", Some(sub)) => rip_client(sub),
        (other, _) => bail!("unknown command {:?}", other),
    }
}

fn main() {
    let matches = app().get_matches();

    let subscriber = StderrSubscriber::with_verbosity(matches.occurrences_of("verbose"));
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("could not install the log subscriber");
    }

    if let Err(error) = run(&matches) {
        eprintln!("error: {}", error);
        for cause in error.iter_causes() {
            eprintln!("  caused by: {}", cause);
        }
        process::exit(1);
    }
}
