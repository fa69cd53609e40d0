use qsys_control::{ConnectionState, DspConfig, KeypadKey, PtzControl, QsysClient};
use tokio::io::{AsyncBufReadExt, BufReader};

fn usage() {
    println!("Commands:");
    println!("  status                      request core status");
    println!("  vol <level> <0-65535>       set volume");
    println!("  mute <level> on|off|toggle  change mute");
    println!("  dial <dialer> [number]      dial or toggle hook");
    println!("  key <dialer> <digit>        press a keypad digit");
    println!("  hangup <dialer>             end the call");
    println!("  cam <camera> <move>         left|right|up|down|in|out|home|stop");
    println!("  campreset <camera> <n>      recall camera preset n (from 1)");
    println!("  preset <n>                  run DSP preset n (from 0)");
    println!("  raw <line>                  send a raw protocol line");
    println!("  quit");
}

fn handle(client: &QsysClient, line: &str) -> Result<bool, Box<dyn std::error::Error>> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(true);
    };
    let target = words.next().unwrap_or_default();
    let arg = words.next().unwrap_or_default();

    match command {
        "quit" | "exit" => return Ok(false),
        "status" => {
            client.request_status()?;
            println!("State: {} / {:?}", client.connection_state(), client.core_status());
        }
        "vol" => {
            let level = client.level(target).ok_or("unknown level")?;
            level.set_volume(arg.parse()?)?;
        }
        "mute" => {
            let level = client.level(target).ok_or("unknown level")?;
            match arg {
                "on" => level.mute_on()?,
                "off" => level.mute_off()?,
                _ => level.mute_toggle()?,
            }
        }
        "dial" => {
            let dialer = client.dialer(target).ok_or("unknown dialer")?;
            if arg.is_empty() {
                dialer.dial()?;
            } else {
                dialer.dial_number(arg)?;
            }
        }
        "key" => {
            let dialer = client.dialer(target).ok_or("unknown dialer")?;
            match arg {
                "clear" => dialer.send_keypad(KeypadKey::Clear)?,
                "back" => dialer.send_keypad(KeypadKey::Backspace)?,
                _ => {
                    for digit in arg.chars() {
                        dialer.send_dtmf(digit)?;
                    }
                }
            }
        }
        "hangup" => {
            client.dialer(target).ok_or("unknown dialer")?.end_call()?;
        }
        "cam" => {
            let camera = client.camera(target).ok_or("unknown camera")?;
            let control = match arg {
                "left" => PtzControl::PanLeft,
                "right" => PtzControl::PanRight,
                "up" => PtzControl::TiltUp,
                "down" => PtzControl::TiltDown,
                "in" => PtzControl::ZoomIn,
                "out" => PtzControl::ZoomOut,
                "home" => PtzControl::Home,
                _ => PtzControl::Stop,
            };
            camera.move_camera(control)?;
        }
        "campreset" => {
            let camera = client.camera(target).ok_or("unknown camera")?;
            camera.recall_preset(arg.parse()?)?;
        }
        "preset" => client.run_preset(target.parse()?)?,
        "raw" => {
            let raw = line.trim_start().trim_start_matches("raw").trim();
            client.send_raw(raw)?;
        }
        _ => usage(),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let path = std::env::args().nth(1).ok_or("usage: console <config.json>")?;
    let config = DspConfig::from_json(&std::fs::read_to_string(path)?)?;
    let client = QsysClient::connect(config).await?;

    for (key, level) in client.levels() {
        let mut updates = level.subscribe();
        let key = key.to_string();
        tokio::spawn(async move {
            while let Ok(update) = updates.recv().await {
                println!("[{}] {:?}", key, update);
            }
        });
    }
    for (key, dialer) in client.dialers() {
        let mut updates = dialer.subscribe();
        let key = key.to_string();
        tokio::spawn(async move {
            while let Ok(update) = updates.recv().await {
                println!("[{}] {:?}", key, update);
            }
        });
    }

    let mut state = client.watch_connection_state();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = *state.borrow();
            if current == ConnectionState::Subscribed {
                println!("Subscribed, type 'help' for commands");
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match handle(&client, &line) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => println!("Error: {}", e),
        }
    }

    client.shutdown().await?;
    Ok(())
}
