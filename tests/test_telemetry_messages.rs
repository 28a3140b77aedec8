use anyhow::Result;
use chrono::{TimeZone, Utc};

use routeb_bridge::config::Mqtt;
use routeb_bridge::echonet::properties::{Coefficient, CumulativeWattHour, InstantAmpere, InstantWatt, Unit};
use routeb_bridge::telemetry::Message;

fn test_mqtt() -> Mqtt {
    Mqtt {
        enabled: true,
        host: "localhost".to_string(),
        port: 1883,
        username: None,
        password: None,
        namespace: "routeb".to_string(),
        device_id: "smartmeter-route-b".to_string(),
        sensor_id: "smartmeter".to_string(),
    }
}

#[test]
fn instant_watt_message_carries_identity_and_timestamp() -> Result<()> {
    let at = Utc.with_ymd_and_hms(2022, 8, 1, 11, 0, 0).unwrap();
    let message = Message::for_instant_watt(&test_mqtt(), at, InstantWatt(1192))?;

    assert_eq!(message.topic, "smartmeter/instant_watt");
    assert!(!message.retain);

    let json: serde_json::Value = serde_json::from_str(&message.payload)?;
    assert_eq!(json["device_id"], "smartmeter-route-b");
    assert_eq!(json["sensor_id"], "smartmeter");
    assert_eq!(json["measured_at"], "2022-08-01T11:00:00Z");
    assert_eq!(json["instant_watt"], 1192);
    Ok(())
}

#[test]
fn instant_ampere_message_reports_both_phases_in_amperes() -> Result<()> {
    let at = Utc.with_ymd_and_hms(2022, 8, 1, 11, 0, 0).unwrap();
    let ampere = InstantAmpere {
        r_deciampere: 123,
        t_deciampere: 42,
    };
    let message = Message::for_instant_ampere(&test_mqtt(), at, ampere)?;

    assert_eq!(message.topic, "smartmeter/instant_ampere");
    let json: serde_json::Value = serde_json::from_str(&message.payload)?;
    assert_eq!(json["instant_ampere_r"], 12.3);
    assert_eq!(json["instant_ampere_t"], 4.2);
    Ok(())
}

#[test]
fn cumulative_message_uses_the_meter_timestamp_and_exact_string() -> Result<()> {
    let cwh = CumulativeWattHour([0x07, 0xE6, 0x08, 0x01, 0x14, 0x00, 0x00, 0x00, 0x01, 0x2C, 0xC7]);
    let message = Message::for_cumulative(&test_mqtt(), &cwh, Some(Coefficient(1)), Unit(0x01))?;

    assert_eq!(message.topic, "smartmeter/cumulative_kwh");
    assert!(message.retain);

    let json: serde_json::Value = serde_json::from_str(&message.payload)?;
    assert_eq!(json["measured_at"], "2022-08-01T20:00:00+09:00");
    assert_eq!(json["cumulative_kwh"], "7699.9");
    Ok(())
}

#[test]
fn cumulative_message_refuses_an_invalid_timestamp() {
    let cwh = CumulativeWattHour([0x07, 0xE6, 0x08, 0x01, 0x14, 0x00, 0xFF, 0x00, 0x01, 0x2C, 0xC7]);
    assert!(Message::for_cumulative(&test_mqtt(), &cwh, None, Unit(0x01)).is_err());
}
