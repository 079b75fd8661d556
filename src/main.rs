use log::{error, info};
use pki_types::{CertificateDer, PrivateKeyDer};
use rustls_pemfile::{certs, private_key};
use socket_relay::config::ServerConfig;
use socket_relay::server::WSServer;
use std::env;
use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::Path;
use std::process::exit;
use std::sync::Arc;

struct Args {
    host: String,
    port: u16,
    tls: bool,
    pem: Option<String>,
    key: Option<String>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        host: "127.0.0.1".to_string(),
        port: 9999,
        tls: false,
        pem: None,
        key: None,
    };

    let mut iter = env::args().skip(1);
    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "-h" => args.host = iter.next().ok_or("-h requires a host")?,
            "-p" => {
                let value = iter.next().ok_or("-p requires a port")?;
                args.port = value
                    .parse()
                    .map_err(|_| format!("invalid port: {}", value))?;
            }
            "--tls" => args.tls = true,
            "--pem" => args.pem = Some(iter.next().ok_or("--pem requires a path")?),
            "--key" => args.key = Some(iter.next().ok_or("--key requires a path")?),
            other => return Err(format!("unknown flag: {}", other)),
        }
    }

    Ok(args)
}

fn load_certs(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    certs(&mut BufReader::new(File::open(path)?)).collect()
}

fn load_key(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    private_key(&mut BufReader::new(File::open(path)?))?
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key found"))
}

fn build_tls_config(pem: &Path, key: &Path) -> io::Result<rustls::ServerConfig> {
    let certs = load_certs(pem)?;
    let key = load_key(key)?;

    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| io::Error::new(ErrorKind::InvalidInput, err))
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("socket-relay: {}", err);
            exit(1);
        }
    };

    let mut config = ServerConfig {
        host: args.host,
        port: args.port,
        ..ServerConfig::default()
    };

    if args.tls {
        let (pem, key) = match (&args.pem, &args.key) {
            (Some(pem), Some(key)) => (pem, key),
            _ => {
                eprintln!("socket-relay: --tls requires both --pem and --key");
                exit(1);
            }
        };
        match build_tls_config(Path::new(pem), Path::new(key)) {
            Ok(tls_config) => config.tls_config = Some(Arc::new(tls_config)),
            Err(err) => {
                eprintln!("socket-relay: TLS error: {}", err);
                exit(1);
            }
        }
    }

    let mut server = WSServer::new(config);
    server.on_connect(|conn| info!("client {} connected", conn.id()));
    server.on_close(|conn| info!("client {} disconnected", conn.id()));

    let handle = server.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down");
            handle.shutdown();
        }
    });

    let result = if args.tls {
        server.listen_tls().await
    } else {
        server.listen().await
    };

    if let Err(err) = result {
        error!("server error: {}", err);
        exit(1);
    }
}
