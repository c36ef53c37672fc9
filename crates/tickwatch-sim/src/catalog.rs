//! The endpoint catalog served by the host.
//!
//! Inline endpoints read the latest [`WorldSnapshot`] and can run on any
//! gateway thread. `getPlayer` and `getDrone` read the live world and are
//! marshalled onto the tick loop thread.
//!
//! Payload field names follow the dashboard convention of `PascalCase`
//! keys with per-object arrays.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tickwatch_dispatch::{CallbackError, CallbackResult, EndpointDescriptor, EndpointRegistry};
use tracing::debug;

use crate::runner::{SharedSnapshot, World};
use crate::world::{DroneMode, FactoryWorld, GeneratorKind, WorldSnapshot, seconds_to_time_string};

/// Register every host endpoint on `registry`.
///
/// Inline endpoints capture `snapshot`; owner-affine ones receive the live
/// world from the bridge.
pub fn register_endpoints(registry: &EndpointRegistry<World>, snapshot: &SharedSnapshot) {
    register_inline(registry, snapshot, "getPower", true, power);
    register_inline(registry, snapshot, "getBiomassGenerator", true, |s| {
        generators(s, GeneratorKind::Biomass)
    });
    register_inline(registry, snapshot, "getFuelGenerator", true, |s| {
        generators(s, GeneratorKind::Fuel)
    });
    register_inline(registry, snapshot, "getProdStats", true, production);
    register_inline(registry, snapshot, "getWorldInv", true, inventory);
    register_inline(registry, snapshot, "getSessionInfo", false, session_info);

    registry.register(EndpointDescriptor::owner_affine(
        "getPlayer",
        true,
        |world: &World, _| with_world(world, player),
    ));
    registry.register(EndpointDescriptor::owner_affine(
        "getDrone",
        true,
        |world: &World, _| with_world(world, drones),
    ));

    debug!(endpoints = registry.len(), "endpoint catalog registered");
}

/// Groups the host serves on top of whatever the config declares.
pub fn default_groups() -> BTreeMap<String, Vec<String>> {
    [
        ("getGenerators", &["getBiomassGenerator", "getFuelGenerator"][..]),
        ("getFactory", &["getPower", "getProdStats", "getWorldInv"][..]),
        ("getVehicles", &["getDrone"][..]),
    ]
    .into_iter()
    .map(|(group, members)| {
        (
            group.to_owned(),
            members.iter().map(|m| (*m).to_owned()).collect(),
        )
    })
    .collect()
}

/// Add the default groups that `groups` does not already define.
pub fn merge_default_groups(groups: &mut BTreeMap<String, Vec<String>>) {
    for (name, members) in default_groups() {
        groups.entry(name).or_insert(members);
    }
}

fn register_inline<F>(
    registry: &EndpointRegistry<World>,
    snapshot: &SharedSnapshot,
    name: &str,
    aggregable: bool,
    view: F,
) where
    F: Fn(&WorldSnapshot) -> CallbackResult + Send + Sync + 'static,
{
    let snapshot = SharedSnapshot::clone(snapshot);
    registry.register(EndpointDescriptor::inline(name, aggregable, move |_| {
        view(&snapshot.load())
    }));
}

fn with_world(world: &World, view: impl FnOnce(&FactoryWorld) -> CallbackResult) -> CallbackResult {
    let live = world
        .try_borrow()
        .map_err(|e| CallbackError::new(format!("world is being updated: {e}")))?;
    view(&live)
}

fn to_json<T: Serialize>(view: &T) -> CallbackResult {
    Ok(serde_json::to_value(view)?)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CircuitView {
    #[serde(rename = "CircuitID")]
    circuit_id: u32,
    power_production: f64,
    power_consumed: f64,
    power_capacity: f64,
    power_max_consumed: f64,
    battery_differential: f64,
    battery_percent: f64,
    battery_capacity: f64,
    battery_time_empty: String,
    battery_time_full: String,
    fuse_triggered: bool,
}

fn power(snapshot: &WorldSnapshot) -> CallbackResult {
    let circuits: Vec<CircuitView> = snapshot
        .circuits
        .iter()
        .map(|c| CircuitView {
            circuit_id: c.id,
            power_production: c.production_mw,
            power_consumed: c.consumed_mw,
            power_capacity: c.capacity_mw,
            power_max_consumed: c.max_consumed_mw,
            battery_differential: c.battery_differential_mw,
            battery_percent: c.battery_percent(),
            battery_capacity: c.battery_capacity_mwh,
            battery_time_empty: seconds_to_time_string(c.seconds_to_empty()),
            battery_time_full: seconds_to_time_string(c.seconds_to_full()),
            fuse_triggered: c.fuse_triggered,
        })
        .collect();
    to_json(&circuits)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GeneratorView {
    #[serde(rename = "ID")]
    id: u32,
    name: &'static str,
    #[serde(rename = "CircuitID")]
    circuit_id: u32,
    base_prod: f64,
    current_prod: f64,
    fuel_amount: f64,
}

fn generators(snapshot: &WorldSnapshot, kind: GeneratorKind) -> CallbackResult {
    let generators: Vec<GeneratorView> = snapshot
        .generators
        .iter()
        .filter(|g| g.kind == kind)
        .map(|g| GeneratorView {
            id: g.id,
            name: g.kind.display_name(),
            circuit_id: g.circuit_id,
            base_prod: g.capacity_mw,
            current_prod: g.output_mw,
            fuel_amount: g.fuel,
        })
        .collect();
    to_json(&generators)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ProductionView<'a> {
    item_name: &'a str,
    current_prod: f64,
    max_prod: f64,
    prod_percent: f64,
    total_produced: u64,
}

fn production(snapshot: &WorldSnapshot) -> CallbackResult {
    let lines: Vec<ProductionView<'_>> = snapshot
        .production
        .iter()
        .map(|line| ProductionView {
            item_name: &line.item,
            current_prod: line.current_per_minute,
            max_prod: line.max_per_minute,
            prod_percent: if line.max_per_minute > 0.0 {
                100.0 * line.current_per_minute / line.max_per_minute
            } else {
                0.0
            },
            total_produced: line.total_produced,
        })
        .collect();
    to_json(&lines)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ItemView<'a> {
    name: &'a str,
    amount: u64,
}

fn inventory(snapshot: &WorldSnapshot) -> CallbackResult {
    let items: Vec<ItemView<'_>> = snapshot
        .inventory
        .iter()
        .map(|(name, amount)| ItemView {
            name,
            amount: *amount,
        })
        .collect();
    to_json(&items)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SessionView<'a> {
    session_name: &'a str,
    tick: u64,
    total_play_duration: f64,
    total_play_duration_text: String,
    reported_at: DateTime<Utc>,
}

fn session_info(snapshot: &WorldSnapshot) -> CallbackResult {
    to_json(&SessionView {
        session_name: &snapshot.session_name,
        tick: snapshot.tick,
        total_play_duration: snapshot.elapsed_secs,
        total_play_duration_text: seconds_to_time_string(snapshot.elapsed_secs),
        reported_at: Utc::now(),
    })
}

#[derive(Debug, Serialize)]
struct Location {
    x: f64,
    y: f64,
    z: f64,
    rotation: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PlayerView<'a> {
    name: &'a str,
    location: Location,
    speed: f64,
    #[serde(rename = "PlayerHP")]
    player_hp: f64,
    online: bool,
}

fn player(world: &FactoryWorld) -> CallbackResult {
    let player = world.player();
    let [x, y, z] = player.position;
    to_json(&[PlayerView {
        name: &player.name,
        location: Location {
            x,
            y,
            z,
            rotation: player.rotation,
        },
        speed: player.speed,
        player_hp: player.health,
        online: true,
    }])
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct DroneView<'a> {
    #[serde(rename = "ID")]
    id: u32,
    home_station: &'a str,
    paired_station: &'a str,
    flying_speed: f64,
    current_flying_mode: &'static str,
    trip_progress: f64,
}

fn drones(world: &FactoryWorld) -> CallbackResult {
    let drones: Vec<DroneView<'_>> = world
        .drones()
        .iter()
        .map(|d| DroneView {
            id: d.id,
            home_station: &d.home_station,
            paired_station: &d.paired_station,
            flying_speed: d.speed_kmh,
            current_flying_mode: match d.mode {
                DroneMode::Outbound => "Flying",
                DroneMode::Returning => "Returning",
            },
            trip_progress: d.progress,
        })
        .collect();
    to_json(&drones)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::indexing_slicing)]

    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::Value;
    use tickwatch_dispatch::{
        DispatchRequest, InvokeContext, Origin, OwnerThreadBridge, RequestRouter,
    };

    use super::*;
    use crate::runner::shared_snapshot;

    struct Fixture {
        registry: Arc<EndpointRegistry<World>>,
        bridge: OwnerThreadBridge<World>,
        world: World,
        snapshot: SharedSnapshot,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = Arc::new(EndpointRegistry::new());
            let snapshot = shared_snapshot();
            register_endpoints(&registry, &snapshot);
            let (bridge, _receiver) = OwnerThreadBridge::channel(Duration::from_millis(200));
            Self {
                registry,
                bridge,
                world: Rc::new(RefCell::new(FactoryWorld::new("Test Save", 5))),
                snapshot,
            }
        }

        fn tick(&self, ticks: u32) {
            let mut world = self.world.borrow_mut();
            for _ in 0..ticks {
                world.advance(1.0);
            }
            self.snapshot.store(Arc::new(world.snapshot()));
        }

        fn call(&self, name: &str) -> Value {
            let descriptor = self.registry.lookup(name).unwrap();
            let ctx = InvokeContext::new(name, Origin::Internal);
            self.bridge
                .invoke_blocking(&descriptor, &ctx, Duration::from_millis(200))
                .unwrap()
        }
    }

    #[test]
    fn catalog_registers_every_endpoint() {
        let fixture = Fixture::new();
        assert_eq!(
            fixture.registry.names(),
            vec![
                "getPower",
                "getBiomassGenerator",
                "getFuelGenerator",
                "getProdStats",
                "getWorldInv",
                "getSessionInfo",
                "getPlayer",
                "getDrone",
            ]
        );
        assert!(!fixture.registry.lookup("getSessionInfo").unwrap().aggregable());
        assert!(fixture.registry.lookup("getPlayer").unwrap().is_owner_affine());
        assert!(!fixture.registry.lookup("getPower").unwrap().is_owner_affine());
    }

    #[test]
    fn power_payload_uses_dashboard_field_names() {
        let fixture = Fixture::new();
        fixture.tick(5);
        let power = fixture.call("getPower");
        let circuits = power.as_array().unwrap();
        assert_eq!(circuits.len(), 2);
        let first = &circuits[0];
        assert_eq!(first["CircuitID"], 1);
        for key in [
            "PowerProduction",
            "PowerConsumed",
            "PowerCapacity",
            "PowerMaxConsumed",
            "BatteryDifferential",
            "BatteryPercent",
            "BatteryCapacity",
            "FuseTriggered",
        ] {
            assert!(first.get(key).is_some(), "missing {key}");
        }
        let empty = first["BatteryTimeEmpty"].as_str().unwrap();
        assert_eq!(empty.len(), 8);
        assert_eq!(&empty[2..3], ":");
    }

    #[test]
    fn generator_endpoints_split_by_kind() {
        let fixture = Fixture::new();
        fixture.tick(1);
        let biomass = fixture.call("getBiomassGenerator");
        let fuel = fixture.call("getFuelGenerator");
        assert_eq!(biomass.as_array().unwrap().len(), 2);
        assert_eq!(fuel.as_array().unwrap().len(), 1);
        assert_eq!(fuel[0]["Name"], "Fuel Generator");
    }

    #[test]
    fn inline_endpoints_follow_the_published_snapshot() {
        let fixture = Fixture::new();
        assert_eq!(fixture.call("getSessionInfo")["Tick"], 0);
        fixture.tick(120);
        let info = fixture.call("getSessionInfo");
        assert_eq!(info["Tick"], 120);
        assert_eq!(info["SessionName"], "Test Save");
        assert_eq!(info["TotalPlayDurationText"], "00:02:00");
        let inventory = fixture.call("getWorldInv");
        assert!(!inventory.as_array().unwrap().is_empty());
    }

    #[test]
    fn owner_affine_endpoints_read_the_live_world() {
        let fixture = Fixture::new();
        let (bridge, receiver) = OwnerThreadBridge::channel(Duration::from_millis(200));
        let _queue = receiver.attach(Rc::clone(&fixture.world));
        fixture.world.borrow_mut().advance(1.0);

        let descriptor = fixture.registry.lookup("getPlayer").unwrap();
        let ctx = InvokeContext::new("getPlayer", Origin::Internal);
        let players = bridge
            .invoke_blocking(&descriptor, &ctx, Duration::from_millis(200))
            .unwrap();
        assert_eq!(players[0]["Name"], "Pioneer");
        assert!(players[0]["Location"]["x"].as_f64().is_some());

        let descriptor = fixture.registry.lookup("getDrone").unwrap();
        let ctx = InvokeContext::new("getDrone", Origin::Internal);
        let drones = bridge
            .invoke_blocking(&descriptor, &ctx, Duration::from_millis(200))
            .unwrap();
        assert_eq!(drones[0]["HomeStation"], "North Hub");
    }

    #[test]
    fn world_borrowed_elsewhere_is_a_callback_failure() {
        let fixture = Fixture::new();
        let (bridge, receiver) = OwnerThreadBridge::channel(Duration::from_millis(200));
        let _queue = receiver.attach(Rc::clone(&fixture.world));
        let _held = fixture.world.borrow_mut();

        let descriptor = fixture.registry.lookup("getPlayer").unwrap();
        let ctx = InvokeContext::new("getPlayer", Origin::Internal);
        let result = bridge.invoke_blocking(&descriptor, &ctx, Duration::from_millis(200));
        assert!(matches!(
            result,
            Err(tickwatch_dispatch::DispatchError::CallbackFailure { .. })
        ));
    }

    #[tokio::test]
    async fn get_all_skips_session_info_and_includes_owner_endpoints() {
        let fixture = Fixture::new();
        let (bridge, receiver) = OwnerThreadBridge::channel(Duration::from_millis(200));
        let _queue = receiver.attach(Rc::clone(&fixture.world));
        fixture.tick(3);

        let router = RequestRouter::new(Arc::clone(&fixture.registry), bridge);
        let response = router.handle(DispatchRequest::All, Origin::Http).await.unwrap();
        let keys: Vec<&String> = response.payload.as_object().unwrap().keys().collect();
        assert!(response.failures.is_empty());
        assert!(!keys.iter().any(|k| k.as_str() == "getSessionInfo"));
        assert!(keys.iter().any(|k| k.as_str() == "getPlayer"));
        assert!(keys.iter().any(|k| k.as_str() == "getDrone"));
    }

    #[test]
    fn configured_groups_win_over_defaults() {
        let mut groups = BTreeMap::new();
        groups.insert(String::from("getGenerators"), vec![String::from("getFuelGenerator")]);
        merge_default_groups(&mut groups);
        assert_eq!(groups["getGenerators"], vec![String::from("getFuelGenerator")]);
        assert_eq!(groups["getVehicles"], vec![String::from("getDrone")]);
        assert!(groups.contains_key("getFactory"));
    }
}
