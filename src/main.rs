use c1218_rs::channel::SerialSettings;
use c1218_rs::{C1218Settings, Connection};

fn main() {
    env_logger::init();

    let device = match std::env::args().nth(1) {
        Some(device) => device,
        None => {
            eprintln!("usage: c1218-rs <serial-device>");
            std::process::exit(2);
        }
    };

    let mut conn = match Connection::open(&device, &SerialSettings::default(), C1218Settings::default()) {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("failed to open {device}: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = conn.start() {
        eprintln!("session bootstrap failed: {e}");
        std::process::exit(1);
    }

    println!("session state: {:?}", conn.state());
}
