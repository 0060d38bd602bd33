//! End-to-end plate behaviour against recording collaborators

mod common;

use common::{mqtt, online, Harness, BASE};
use hasp_core::events::{PlateOfflineData, PlateOnlineData};
use hasp_core::ObjectId;
use hasp_plate::{Availability, PlateCommand, PlateError, PlateInput, PlateSnapshot};
use serde_json::json;
use std::fs;
use tempfile::TempDir;

fn sorted(mut messages: Vec<(String, String)>) -> Vec<(String, String)> {
    messages.sort();
    messages
}

#[tokio::test]
async fn test_tracked_switch_publishes_val() {
    let harness = Harness::new();
    let mut plate = harness.plate("objects:\n  - obj: p1b2\n    track: switch.lamp\n");
    online(&harness, &mut plate).await;

    let change = harness.set_state("switch.lamp", "on");
    plate.handle(PlateInput::StateChanged(change)).await;

    assert_eq!(harness.publisher.payloads("command/p1b2.val"), vec!["1"]);
}

#[tokio::test]
async fn test_panel_val_turns_light_on() {
    let harness = Harness::new();
    let mut plate = harness.plate("objects:\n  - obj: p1b3\n    track: light.kitchen\n");
    online(&harness, &mut plate).await;

    plate.handle(mqtt("state/p1b3", r#"{"val":1}"#)).await;

    let calls = harness.caller.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].service_id(), "light.turn_on");
    assert_eq!(calls[0].service_data, json!({"entity_id": "light.kitchen"}));
}

#[tokio::test]
async fn test_offline_then_online_refreshes_once() {
    let harness = Harness::new();
    harness.set_state("sensor.temperature", "21.5");
    let mut plate = harness.plate(
        "objects:\n  - obj: p1b4\n    properties:\n      text: \"{{ states('sensor.temperature') }}\"\n",
    );
    plate.start().await;
    harness.publisher.clear();

    let mut online_events = harness.bus.subscribe_typed::<PlateOnlineData>();
    let mut offline_events = harness.bus.subscribe_typed::<PlateOfflineData>();

    plate.handle(mqtt("LWT", "offline")).await;
    assert_eq!(plate.availability(), Availability::Offline);
    assert!(harness.publisher.messages().is_empty());
    assert_eq!(offline_events.try_recv().unwrap().data.plate, "plate1");

    plate.handle(mqtt("LWT", "online")).await;
    assert_eq!(plate.availability(), Availability::Online);
    assert_eq!(online_events.try_recv().unwrap().data.plate, "plate1");

    assert_eq!(harness.publisher.payloads("command/page"), vec!["1"]);
    assert_eq!(harness.publisher.payloads("command/p1b4.text"), vec!["21.5"]);
    assert_eq!(harness.publisher.payloads("command/dim"), vec!["100"]);
    assert_eq!(harness.publisher.payloads("command/light"), vec!["1"]);

    let entity = harness.states.get("openhasp.plate1").unwrap();
    assert_eq!(entity.attribute::<bool>("available"), Some(true));
}

#[tokio::test]
async fn test_repeated_online_does_not_refresh() {
    let harness = Harness::new();
    let mut plate = harness.plate("");
    online(&harness, &mut plate).await;

    plate.handle(mqtt("LWT", "online")).await;
    assert!(harness.publisher.messages().is_empty());
}

#[tokio::test]
async fn test_malformed_lwt_is_ignored() {
    let harness = Harness::new();
    let mut plate = harness.plate("");
    plate.handle(mqtt("LWT", "rebooting")).await;
    assert_eq!(plate.availability(), Availability::Unknown);
    assert!(harness.publisher.messages().is_empty());
}

#[tokio::test]
async fn test_next_button_changes_page_on_down_only() {
    let harness = Harness::new();
    let mut plate = harness.plate("pages:\n  next_obj: p0b3\n  max: 5\n");
    online(&harness, &mut plate).await;
    plate.execute(PlateCommand::ChangePage(3)).await;
    harness.publisher.clear();

    plate.handle(mqtt("state/p0b3", r#"{"event":"down"}"#)).await;
    assert_eq!(plate.current_page(), 4);
    assert_eq!(harness.publisher.payloads("command/page"), vec!["4"]);

    plate.handle(mqtt("state/p0b3", r#"{"event":"up"}"#)).await;
    assert_eq!(plate.current_page(), 4);
    assert_eq!(harness.publisher.payloads("command/page"), vec!["4"]);
}

#[tokio::test]
async fn test_page_buttons_stay_in_bounds() {
    let harness = Harness::new();
    let mut plate =
        harness.plate("pages:\n  prev_obj: p0b1\n  home_obj: p0b2\n  next_obj: p0b3\n  max: 2\n");
    online(&harness, &mut plate).await;

    plate.handle(mqtt("state/p0b1", r#"{"event":"down"}"#)).await;
    assert_eq!(plate.current_page(), 1);

    plate.handle(mqtt("state/p0b3", r#"{"event":"down"}"#)).await;
    plate.handle(mqtt("state/p0b3", r#"{"event":"down"}"#)).await;
    assert_eq!(plate.current_page(), 2);

    plate.handle(mqtt("state/p0b2", r#"{"event":"down"}"#)).await;
    assert_eq!(plate.current_page(), 1);

    assert_eq!(harness.publisher.payloads("command/page"), vec!["2", "1"]);
    assert!(harness
        .publisher
        .messages()
        .iter()
        .all(|(_, payload)| !payload.contains("next")));
}

#[tokio::test]
async fn test_out_of_range_page_never_publishes() {
    for max in [1u32, 3, 12] {
        let harness = Harness::new();
        let mut plate = harness.plate(&format!("pages:\n  max: {max}\n"));
        online(&harness, &mut plate).await;

        assert!(plate.change_page(0).await.is_err());
        assert!(plate.change_page(max + 1).await.is_err());
        plate.execute(PlateCommand::ChangePage(max + 1)).await;

        assert_eq!(plate.current_page(), 1);
        assert!(harness.publisher.messages().is_empty());
    }
}

#[tokio::test]
async fn test_refresh_is_idempotent() {
    let harness = Harness::new();
    harness.set_state("sensor.temperature", "19");
    harness.set_state("switch.lamp", "off");
    let mut plate = harness.plate(
        r##"objects:
  - obj: p1b1
    track: switch.lamp
  - obj: p1b2
    properties:
      text: "{{ states('sensor.temperature') }}"
      text_color: "#FF0000"
"##,
    );
    online(&harness, &mut plate).await;

    plate.refresh().await;
    let first = sorted(harness.publisher.take());
    plate.refresh().await;
    let second = sorted(harness.publisher.take());

    assert_eq!(first, second);
    assert!(first.contains(&(format!("{BASE}/command/p1b1.val"), "0".to_string())));
    assert!(first.contains(&(format!("{BASE}/command/p1b2.text_color"), "#FF0000".to_string())));
}

#[tokio::test]
async fn test_idle_round_trip() {
    let harness = Harness::new();
    let mut plate = harness.plate("idle_brightness: 15\nawake_brightness: 90\n");
    online(&harness, &mut plate).await;

    for _ in 0..3 {
        plate.handle(mqtt("state/idle", "short")).await;
    }
    assert_eq!((plate.dim(), plate.backlight()), (15, true));

    plate.handle(mqtt("state/idle", "off")).await;
    assert_eq!((plate.dim(), plate.backlight()), (90, true));

    assert_eq!(
        harness.publisher.payloads("command/dim"),
        vec!["15", "15", "15", "90"]
    );
    assert_eq!(harness.publisher.payloads("command/light"), vec!["1"; 4]);
}

#[tokio::test]
async fn test_idle_long_turns_backlight_off() {
    let harness = Harness::new();
    let mut plate = harness.plate("");
    online(&harness, &mut plate).await;

    plate.handle(mqtt("state/idle", "short")).await;
    plate.handle(mqtt("state/idle", "long")).await;

    assert_eq!(harness.publisher.payloads("command/dim"), vec!["10", "10"]);
    assert_eq!(harness.publisher.payloads("command/light"), vec!["1", "0"]);
    assert_eq!(
        harness.store.get("plate1"),
        Some(PlateSnapshot {
            page: 1,
            dim: 10,
            backlight: false
        })
    );

    plate.handle(mqtt("state/idle", "dozing")).await;
    assert_eq!(harness.publisher.payloads("command/dim").len(), 2);
}

#[tokio::test]
async fn test_echoes_do_not_amplify() {
    let harness = Harness::new();
    let mut plate = harness.plate("objects:\n  - obj: p1b3\n    track: light.kitchen\n");
    online(&harness, &mut plate).await;

    let rounds = 6;
    for i in 0..rounds {
        let (state, val) = if i % 2 == 0 { ("on", 1) } else { ("off", 0) };
        let change = harness.set_state("light.kitchen", state);
        plate.handle(PlateInput::StateChanged(change)).await;
        plate
            .handle(mqtt(
                "state/p1b3",
                &format!(r#"{{"event":"changed","val":{val}}}"#),
            ))
            .await;
    }

    assert_eq!(harness.publisher.payloads("command/p1b3.val").len(), rounds);
    assert!(harness.caller.calls().is_empty());
}

#[tokio::test]
async fn test_panel_toggle_is_not_echoed_back() {
    let harness = Harness::new();
    harness.set_state("light.kitchen", "off");
    let mut plate = harness.plate("objects:\n  - obj: p1b3\n    track: light.kitchen\n");
    online(&harness, &mut plate).await;

    plate.handle(mqtt("state/p1b3", r#"{"val":1}"#)).await;
    assert_eq!(harness.caller.service_ids(), vec!["light.turn_on"]);

    let change = harness.set_state("light.kitchen", "on");
    plate.handle(PlateInput::StateChanged(change)).await;
    assert!(harness.publisher.payloads("command/p1b3.val").is_empty());
}

#[tokio::test]
async fn test_press_freezes_payload_keys() {
    let harness = Harness::new();
    harness.set_state("sensor.level", "1");
    let mut plate = harness.plate(
        "objects:\n  - obj: p2b1\n    properties:\n      text: \"{{ states('sensor.level') }}\"\n",
    );
    online(&harness, &mut plate).await;

    plate
        .handle(mqtt("state/p2b1", r#"{"event":"down","text":"x"}"#))
        .await;
    let change = harness.set_state("sensor.level", "2");
    plate.handle(PlateInput::StateChanged(change)).await;
    assert!(harness.publisher.payloads("command/p2b1.text").is_empty());
    assert_eq!(
        plate.object(ObjectId::new(2, 1)).unwrap().cached("text"),
        Some("2")
    );

    plate.handle(mqtt("state/p2b1", r#"{"event":"up"}"#)).await;
    let change = harness.set_state("sensor.level", "3");
    plate.handle(PlateInput::StateChanged(change)).await;
    assert_eq!(harness.publisher.payloads("command/p2b1.text"), vec!["3"]);
}

#[tokio::test]
async fn test_template_failing_on_first_render_recovers() {
    let harness = Harness::new();
    let mut plate = harness.plate(
        "objects:\n  - obj: p1b4\n    properties:\n      text: \"{{ (states('sensor.raw') | from_json).a }}\"\n",
    );
    online(&harness, &mut plate).await;
    assert!(harness.publisher.payloads("command/p1b4.text").is_empty());

    let change = harness.set_state("sensor.raw", r#"{"a": 7}"#);
    plate.handle(PlateInput::StateChanged(change)).await;

    assert_eq!(harness.publisher.payloads("command/p1b4.text"), vec!["7"]);
}

#[tokio::test]
async fn test_offline_updates_cache_only() {
    let harness = Harness::new();
    let mut plate = harness.plate("objects:\n  - obj: p1b2\n    track: switch.lamp\n");
    online(&harness, &mut plate).await;
    plate.handle(mqtt("LWT", "offline")).await;

    let change = harness.set_state("switch.lamp", "on");
    plate.handle(PlateInput::StateChanged(change)).await;
    assert!(harness.publisher.payloads("command/p1b2.val").is_empty());

    plate.handle(mqtt("LWT", "online")).await;
    assert_eq!(harness.publisher.payloads("command/p1b2.val"), vec!["1"]);
}

#[tokio::test]
async fn test_event_calls_run_in_order_past_failures() {
    let harness = Harness::new();
    let mut plate = harness.plate(
        r#"objects:
  - obj: p1b5
    event:
      up:
        - service: scene.turn_on
          target:
            entity_id: scene.movie
        - service: light.turn_off
          target:
            entity_id: light.kitchen
"#,
    );
    online(&harness, &mut plate).await;
    harness.caller.fail("scene.turn_on");

    plate.handle(mqtt("state/p1b5", r#"{"event":"UP"}"#)).await;
    assert_eq!(
        harness.caller.service_ids(),
        vec!["scene.turn_on", "light.turn_off"]
    );

    plate.handle(mqtt("state/p1b5", r#"{"event":"upward"}"#)).await;
    plate.handle(mqtt("state/p1b5", "not json")).await;
    assert_eq!(harness.caller.calls().len(), 2);
}

#[tokio::test]
async fn test_statusupdate_sets_bound_and_entity() {
    let harness = Harness::new();
    let mut plate = harness.plate("");
    online(&harness, &mut plate).await;

    plate
        .handle(mqtt(
            "state/statusupdate",
            r#"{"node":"plate1","version":"0.6.3","uptime":42,"canUpdate":false,"page":2,"numPages":4,"ssid":"home"}"#,
        ))
        .await;

    assert_eq!(plate.num_pages(), 4);
    assert_eq!(plate.current_page(), 2);
    assert_eq!(plate.availability(), Availability::Online);

    let entity = harness.states.get("openhasp.plate1").unwrap();
    assert_eq!(entity.state, "2");
    assert_eq!(entity.attribute::<String>("version").as_deref(), Some("0.6.3"));
    assert_eq!(entity.attribute::<String>("ssid").as_deref(), Some("home"));
    assert_eq!(entity.attribute::<u32>("page"), None);
}

#[tokio::test]
async fn test_restored_page_revalidated_by_statusupdate() {
    let harness = Harness::new();
    harness.store.put(
        "plate1",
        PlateSnapshot {
            page: 9,
            dim: 50,
            backlight: true,
        },
    );
    let mut plate = harness.plate("");
    plate.start().await;

    assert_eq!(plate.current_page(), 9);
    assert_eq!(harness.publisher.payloads("command"), vec!["statusupdate"]);
    assert_eq!(harness.publisher.payloads("command/dim"), vec!["50"]);
    harness.publisher.clear();

    plate
        .handle(mqtt(
            "state/statusupdate",
            r#"{"node":"plate1","version":"0.6.3","uptime":1,"canUpdate":false,"numPages":4}"#,
        ))
        .await;

    assert_eq!(plate.current_page(), 1);
    assert_eq!(harness.publisher.payloads("command/page"), vec!["1"]);
    assert_eq!(harness.store.get("plate1").map(|s| s.page), Some(1));
}

#[tokio::test]
async fn test_inbound_page_state() {
    let harness = Harness::new();
    let mut plate = harness.plate("pages:\n  max: 3\n");
    online(&harness, &mut plate).await;

    plate.handle(mqtt("state/page", "3")).await;
    assert_eq!(plate.current_page(), 3);

    plate.handle(mqtt("state/page", "7")).await;
    plate.handle(mqtt("state/page", "three")).await;
    assert_eq!(plate.current_page(), 3);
    assert!(harness.publisher.messages().is_empty());
}

#[tokio::test]
async fn test_load_pages_streams_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pages.jsonl");
    fs::write(
        &path,
        "{\"page\":1,\"id\":1,\"obj\":\"btn\"}\n\n  {\"page\":2,\"id\":1,\"obj\":\"label\"}  \n",
    )
    .unwrap();

    let harness = Harness::new().allow(dir.path());
    let mut plate = harness.plate("pages:\n  max: 2\n");
    online(&harness, &mut plate).await;

    plate.execute(PlateCommand::LoadPages(path)).await;

    assert_eq!(
        harness.publisher.payloads("command"),
        vec!["clearpage 1", "clearpage 2"]
    );
    assert_eq!(
        harness.publisher.payloads("command/jsonl"),
        vec![
            r#"{"page":1,"id":1,"obj":"btn"}"#,
            r#"  {"page":2,"id":1,"obj":"label"}  "#
        ]
    );
    assert_eq!(harness.publisher.payloads("command/page"), vec!["1"]);
}

#[tokio::test]
async fn test_load_pages_refuses_bad_paths() {
    let allowed = TempDir::new().unwrap();
    let outside = TempDir::new().unwrap();
    let foreign = outside.path().join("pages.jsonl");
    fs::write(&foreign, "{\"page\":1}\n").unwrap();

    let harness = Harness::new().allow(allowed.path());
    let mut plate = harness.plate("");
    online(&harness, &mut plate).await;

    for path in [
        foreign,
        outside.path().join("missing.jsonl"),
        allowed.path().join("../missing.jsonl"),
    ] {
        assert!(matches!(
            plate.load_pages(&path).await,
            Err(PlateError::PathNotAllowed(_))
        ));
    }
    assert!(matches!(
        plate.load_pages(allowed.path()).await,
        Err(PlateError::NotAFile(_))
    ));
    assert!(plate.load_pages(&allowed.path().join("missing.jsonl")).await.is_err());
    assert!(harness.publisher.messages().is_empty());
}

#[tokio::test]
async fn test_pages_file_sent_when_plate_comes_online() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plate1.jsonl");
    fs::write(&path, "{\"page\":1,\"id\":0,\"bg_color\":\"#000000\"}\n").unwrap();

    let harness = Harness::new().allow(dir.path());
    let mut plate = harness.plate(&format!("pages:\n  path: {}\n  max: 1\n", path.display()));
    plate.start().await;
    harness.publisher.clear();

    plate.handle(mqtt("LWT", "online")).await;

    assert_eq!(harness.publisher.payloads("command"), vec!["clearpage 1"]);
    assert_eq!(harness.publisher.payloads("command/jsonl").len(), 1);
    assert_eq!(harness.publisher.payloads("command/page"), vec!["1"]);
}

#[tokio::test]
async fn test_plate_services() {
    let harness = Harness::new();
    let mut plate = harness.plate("pages:\n  max: 4\n");
    online(&harness, &mut plate).await;

    plate.execute(PlateCommand::Wakeup).await;
    plate.execute(PlateCommand::NextPage).await;
    plate.execute(PlateCommand::NextPage).await;
    plate.execute(PlateCommand::PrevPage).await;
    plate.execute(PlateCommand::ClearPage(Some(2))).await;
    plate.execute(PlateCommand::ClearPage(None)).await;

    assert_eq!(
        harness.publisher.payloads("command"),
        vec!["wakeup", "clearpage 2", "clearpage all"]
    );
    assert_eq!(
        harness.publisher.payloads("command/page"),
        vec!["2", "3", "2", "1"]
    );

    harness.publisher.clear();
    plate
        .execute(PlateCommand::Backlight {
            on: true,
            brightness: Some(40),
        })
        .await;
    assert_eq!(harness.publisher.payloads("command/dim"), vec!["40"]);
    assert_eq!(harness.publisher.payloads("command/light"), vec!["1"]);

    plate.handle(mqtt("state/idle", "off")).await;
    assert_eq!(plate.dim(), 40);
}

#[tokio::test]
async fn test_start_syncs_current_states() {
    let harness = Harness::new();
    harness.set_state("alarm_control_panel.home", "armed_away");
    harness.set_state("sensor.temperature", "20");
    let mut plate = harness.plate(
        r#"objects:
  - obj: p1b1
    track: alarm_control_panel.home
  - obj: p1b2
    properties:
      text: "{{ states('sensor.temperature') }} °C"
"#,
    );
    plate.start().await;

    assert_eq!(harness.publisher.payloads("command/p1b1.val"), vec!["1"]);
    assert_eq!(harness.publisher.payloads("command/p1b2.text"), vec!["20 °C"]);
    assert_eq!(
        plate.subscriptions(),
        vec![
            format!("{BASE}/LWT"),
            format!("{BASE}/state/idle"),
            format!("{BASE}/state/p1b1"),
            format!("{BASE}/state/p1b2"),
            format!("{BASE}/state/page"),
            format!("{BASE}/state/statusupdate"),
        ]
    );
}
