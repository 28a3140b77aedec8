use routeb_bridge::echonet::frame::EchonetLiteProp;
use routeb_bridge::echonet::properties::{
    cumulative_kilowatt_hours, format_cumulative_kwh_string, pick_meter_data, Coefficient,
    CumulativeWattHour, InstantAmpere, InstantWatt, MeterValue, Pickup, Unit,
};

fn prop(epc: u8, edt: &[u8]) -> EchonetLiteProp {
    EchonetLiteProp {
        epc,
        pdc: edt.len() as u8,
        edt: edt.to_vec(),
    }
}

#[test]
fn instantaneous_power_decodes_to_watts() {
    let pickup = pick_meter_data(&prop(0xE7, &[0x00, 0x00, 0x04, 0xA8]));
    assert_eq!(
        pickup,
        Pickup::Value(MeterValue::InstantWatt(InstantWatt(1192)))
    );
}

#[test]
fn instantaneous_power_with_the_wrong_length_is_an_error() {
    assert!(matches!(
        pick_meter_data(&prop(0xE7, &[0x00, 0x00, 0x04])),
        Pickup::Error(_)
    ));
}

#[test]
fn instantaneous_currents_decode_per_phase() {
    let pickup = pick_meter_data(&prop(0xE8, &[0x00, 0x7B, 0x00, 0x2A]));
    match pickup {
        Pickup::Value(MeterValue::InstantAmpere(ampere)) => {
            assert_eq!(ampere.r_deciampere, 123);
            assert_eq!(ampere.t_deciampere, 42);
            assert_eq!(ampere.ampere_r(), 12.3);
            assert_eq!(ampere.ampere_t(), 4.2);
        }
        other => panic!("unexpected pickup: {:?}", other),
    }
}

#[test]
fn cumulative_reading_decodes_date_and_raw_value() {
    let edt = [0x07, 0xE6, 0x08, 0x01, 0x14, 0x00, 0x00, 0x00, 0x01, 0x2C, 0xC7];
    let pickup = pick_meter_data(&prop(0xEA, &edt));
    match pickup {
        Pickup::Value(MeterValue::CumulativeWattHour(cwh)) => {
            assert_eq!(cwh.year(), 2022);
            assert_eq!(cwh.month(), 8);
            assert_eq!(cwh.day(), 1);
            assert_eq!(cwh.hour(), 20);
            assert_eq!(cwh.minutes(), 0);
            assert_eq!(cwh.seconds(), 0);
            assert_eq!(cwh.raw_watt_hour(), 76999);
            assert!(cwh.valid());
            assert_eq!(
                cwh.to_iso8601().as_deref(),
                Some("2022-08-01T20:00:00+09:00")
            );
            // 2022-08-01T20:00:00+09:00 is 11:00 UTC
            assert_eq!(cwh.to_unix_time(), Some(1659351600));
        }
        other => panic!("unexpected pickup: {:?}", other),
    }
}

#[test]
fn cumulative_reading_with_invalid_seconds_has_no_timestamp() {
    let cwh = CumulativeWattHour([0x07, 0xE6, 0x08, 0x01, 0x14, 0x00, 0xFF, 0x00, 0x01, 0x2C, 0xC7]);
    assert!(!cwh.valid());
    assert_eq!(cwh.to_unix_time(), None);
    assert_eq!(cwh.to_iso8601(), None);
}

#[test]
fn unit_table_maps_exactly_nine_codes() {
    let expected = [
        (0x00u8, 0i8),
        (0x01, -1),
        (0x02, -2),
        (0x03, -3),
        (0x04, -4),
        (0x0A, 1),
        (0x0B, 2),
        (0x0C, 3),
        (0x0D, 4),
    ];
    for (code, exponent) in expected {
        assert_eq!(Unit(code).powers_of_10(), Some(exponent), "code {:02X}", code);
        assert!(matches!(
            pick_meter_data(&prop(0xE1, &[code])),
            Pickup::Value(MeterValue::Unit(_))
        ));
    }
    for code in [0x05u8, 0x09, 0x0E, 0x42, 0xFF] {
        assert_eq!(Unit(code).powers_of_10(), None);
        assert!(matches!(
            pick_meter_data(&prop(0xE1, &[code])),
            Pickup::Error(_)
        ));
    }
}

#[test]
fn coefficient_defaults_to_one_on_a_bad_length() {
    // the one documented exception to strict length checking
    assert_eq!(
        pick_meter_data(&prop(0xD3, &[0x01])),
        Pickup::Value(MeterValue::Coefficient(Coefficient(1)))
    );
    assert_eq!(
        pick_meter_data(&prop(0xD3, &[0x00, 0x00, 0x00, 0x0A])),
        Pickup::Value(MeterValue::Coefficient(Coefficient(10)))
    );
}

#[test]
fn informational_codes_are_ignored_not_errors() {
    assert!(matches!(
        pick_meter_data(&prop(0x80, &[0x30])),
        Pickup::Ignored(_)
    ));
    assert!(matches!(
        pick_meter_data(&prop(0x88, &[0x42])),
        Pickup::Ignored(_)
    ));
    assert!(matches!(
        pick_meter_data(&prop(0x8A, &[0x00, 0x00, 0x16])),
        Pickup::Ignored(_)
    ));
    assert!(matches!(
        pick_meter_data(&prop(0xE5, &[0x01])),
        Pickup::Ignored(_)
    ));
}

#[test]
fn informational_codes_with_bad_lengths_become_errors() {
    assert!(matches!(
        pick_meter_data(&prop(0x80, &[0x30, 0x31])),
        Pickup::Error(_)
    ));
    assert!(matches!(
        pick_meter_data(&prop(0x8A, &[0x00])),
        Pickup::Error(_)
    ));
}

#[test]
fn unknown_codes_are_errors() {
    assert!(matches!(
        pick_meter_data(&prop(0xC0, &[0x00])),
        Pickup::Error(_)
    ));
}

#[test]
fn kilowatt_hours_scale_by_coefficient_and_unit() {
    let cwh = CumulativeWattHour([0x07, 0xE6, 0x08, 0x01, 0x14, 0x00, 0x00, 0x00, 0x01, 0x2C, 0xC7]);
    let kwh = cumulative_kilowatt_hours(&cwh, Coefficient(1), Unit(0x01));
    assert!((kwh - 7699.9).abs() < 1e-9);
    let kwh = cumulative_kilowatt_hours(&cwh, Coefficient(10), Unit(0x00));
    assert!((kwh - 769990.0).abs() < 1e-9);
}

#[test]
fn kwh_string_shifts_the_decimal_point_without_floats() {
    let cwh = CumulativeWattHour([0x07, 0xE6, 0x08, 0x01, 0x14, 0x00, 0x00, 0x00, 0x01, 0x2C, 0xC7]);
    assert_eq!(format_cumulative_kwh_string(&cwh, None, Unit(0x01)), "7699.9");
    assert_eq!(format_cumulative_kwh_string(&cwh, None, Unit(0x00)), "76999.");
    assert_eq!(
        format_cumulative_kwh_string(&cwh, None, Unit(0x0A)),
        "769990."
    );
    assert_eq!(
        format_cumulative_kwh_string(&cwh, Some(Coefficient(2)), Unit(0x02)),
        "1539.98"
    );
}

#[test]
fn kwh_string_pads_small_values_with_leading_zeros() {
    let cwh = CumulativeWattHour([0x07, 0xE6, 0x08, 0x01, 0x14, 0x00, 0x00, 0x00, 0x00, 0x00, 0x07]);
    assert_eq!(format_cumulative_kwh_string(&cwh, None, Unit(0x04)), "0.0007");
}
