// Basic device discovery and connection example
//
// Discovers the attached BattLab One, connects and prints the firmware
// version, config word and calibration table.

use battlab_one::{BattLabConnector, Value};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("BattLab One Discovery Example");
    println!("=============================\n");

    let devices = BattLabConnector::get_available_devices()?;
    if devices.is_empty() {
        println!("No BattLab One found. Please connect one and try again.");
        return Ok(());
    }
    for device in &devices {
        println!("Found {} at {}", device.serial_number, device.port);
    }

    let mut session = BattLabConnector::connect()?;
    println!("Connected, calibration table loaded");

    if let Value::Number(version) = session.execute("get_version")? {
        println!("Firmware version: {version}");
    }
    if let Value::Hex(config) = session.execute("get_config")? {
        println!("Config word: {config}");
    }
    println!("Calibration entries: {:?}", session.calibration().entries());

    Ok(())
}
