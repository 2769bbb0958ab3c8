//! Manual exercise harness for the protocol core against a plain TCP
//! transport (spec §1 "Crate identity": "never dials a socket or
//! negotiates TLS" applies to the library, not this binary). Speaks h2c
//! (prior-knowledge, no TLS/ALPN), so it only works against a server
//! configured to accept that.

use std::net::TcpStream;

use clap::{crate_version, App, Arg};
use http2::{Client, Http2Config, Url};

fn main() {
    env_logger::init();

    let matches = App::new("http2-cli")
        .version(crate_version!())
        .arg(Arg::with_name("url").required(true).index(1))
        .get_matches();
    let url = Url::parse(matches.value_of("url").expect("missing url")).expect("invalid url");

    let host = url.host_str().expect("url has no host");
    let port = url.port_or_known_default().unwrap_or(80);
    let stream = TcpStream::connect((host, port)).expect("failed to connect");

    let mut client = Client::new(stream, Http2Config::default());
    match client.get(url) {
        Ok(response) => {
            println!("{}", String::from_utf8_lossy(&response.body));
        }
        Err(err) => eprintln!("{err}"),
    }
}
