//! The simulated factory.
//!
//! [`FactoryWorld`] is a small deterministic model of a factory: power
//! circuits fed by generators, production lines filling a world inventory,
//! one player walking the floor, and a few delivery drones. It is owned by
//! the tick loop and advanced once per tick.
//!
//! Everything the inline endpoints need is copied into a [`WorldSnapshot`]
//! after each tick. Player and drone state stays in the live world and is
//! only reachable through owner-affine endpoints.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Seconds a tripped fuse stays open before the circuit recovers.
const FUSE_RESET_SECS: f64 = 10.0;

/// Fuel units a generator holds when full.
const FUEL_TANK: f64 = 100.0;

/// Fuel units burned per second at full load.
const FUEL_BURN_PER_SEC: f64 = 0.5;

/// Relative jitter applied to circuit demand each tick.
const DEMAND_JITTER: f64 = 0.05;

/// Kind of power generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorKind {
    /// Burns biomass.
    Biomass,
    /// Burns liquid fuel.
    Fuel,
}

impl GeneratorKind {
    /// Display name used in endpoint payloads.
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Biomass => "Biomass Burner",
            Self::Fuel => "Fuel Generator",
        }
    }
}

/// One generator attached to a circuit.
#[derive(Debug, Clone, PartialEq)]
pub struct Generator {
    /// Generator id.
    pub id: u32,
    /// What it burns.
    pub kind: GeneratorKind,
    /// Circuit it feeds.
    pub circuit_id: u32,
    /// Output at full load, in MW.
    pub capacity_mw: f64,
    /// Current output, in MW.
    pub output_mw: f64,
    /// Remaining fuel units.
    pub fuel: f64,
}

/// One power circuit.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerCircuit {
    /// Circuit id.
    pub id: u32,
    /// Baseline demand of the machines on this circuit, in MW.
    pub base_demand_mw: f64,
    /// Power produced this tick, in MW.
    pub production_mw: f64,
    /// Power consumed this tick, in MW.
    pub consumed_mw: f64,
    /// Sum of generator capacity, in MW.
    pub capacity_mw: f64,
    /// Highest demand seen so far, in MW.
    pub max_consumed_mw: f64,
    /// Net flow into the batteries, in MW.
    pub battery_differential_mw: f64,
    /// Stored energy, in MWh.
    pub battery_store_mwh: f64,
    /// Battery capacity, in MWh.
    pub battery_capacity_mwh: f64,
    /// Whether the fuse is open.
    pub fuse_triggered: bool,
    fuse_cooldown: f64,
}

impl PowerCircuit {
    fn new(id: u32, base_demand_mw: f64, battery_capacity_mwh: f64) -> Self {
        Self {
            id,
            base_demand_mw,
            production_mw: 0.0,
            consumed_mw: 0.0,
            capacity_mw: 0.0,
            max_consumed_mw: 0.0,
            battery_differential_mw: 0.0,
            battery_store_mwh: battery_capacity_mwh / 2.0,
            battery_capacity_mwh,
            fuse_triggered: false,
            fuse_cooldown: 0.0,
        }
    }

    /// Battery charge in percent, `0` without batteries.
    pub fn battery_percent(&self) -> f64 {
        if self.battery_capacity_mwh > 0.0 {
            100.0 * self.battery_store_mwh / self.battery_capacity_mwh
        } else {
            0.0
        }
    }

    /// Seconds until the batteries are empty at the current drain rate.
    pub fn seconds_to_empty(&self) -> f64 {
        if self.battery_differential_mw < 0.0 {
            self.battery_store_mwh * 3600.0 / -self.battery_differential_mw
        } else {
            0.0
        }
    }

    /// Seconds until the batteries are full at the current charge rate.
    pub fn seconds_to_full(&self) -> f64 {
        if self.battery_differential_mw > 0.0 {
            (self.battery_capacity_mwh - self.battery_store_mwh) * 3600.0
                / self.battery_differential_mw
        } else {
            0.0
        }
    }
}

/// One production line.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductionLine {
    /// Item produced.
    pub item: String,
    /// Nameplate rate, items per minute.
    pub max_per_minute: f64,
    /// Actual rate this tick, items per minute.
    pub current_per_minute: f64,
    /// Items produced since start.
    pub total_produced: u64,
    carry: f64,
}

/// The player character.
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    /// Player name.
    pub name: String,
    /// World position, in metres.
    pub position: [f64; 3],
    /// Facing, in degrees.
    pub rotation: f64,
    /// Walking speed, in metres per second.
    pub speed: f64,
    /// Health points.
    pub health: f64,
    heading: f64,
}

/// Whether a drone is in the air.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DroneMode {
    /// Flying to its paired station.
    Outbound,
    /// Flying back home.
    Returning,
}

/// A delivery drone shuttling between two stations.
#[derive(Debug, Clone, PartialEq)]
pub struct Drone {
    /// Drone id.
    pub id: u32,
    /// Station it belongs to.
    pub home_station: String,
    /// Station it delivers to.
    pub paired_station: String,
    /// Flying speed, in km/h.
    pub speed_kmh: f64,
    /// Direction of the current trip.
    pub mode: DroneMode,
    /// Fraction of the current trip completed.
    pub progress: f64,
    /// Trip duration, in seconds.
    pub trip_secs: f64,
}

/// Read-only copy of what inline endpoints serve.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldSnapshot {
    /// Ticks advanced so far.
    pub tick: u64,
    /// Simulated seconds elapsed.
    pub elapsed_secs: f64,
    /// Save session name.
    pub session_name: String,
    /// Power circuits.
    pub circuits: Vec<PowerCircuit>,
    /// Generators.
    pub generators: Vec<Generator>,
    /// Production lines.
    pub production: Vec<ProductionLine>,
    /// Item totals across all storage.
    pub inventory: BTreeMap<String, u64>,
}

/// The live factory. Owned by the tick loop.
#[derive(Debug)]
pub struct FactoryWorld {
    tick: u64,
    elapsed_secs: f64,
    session_name: String,
    circuits: Vec<PowerCircuit>,
    generators: Vec<Generator>,
    production: Vec<ProductionLine>,
    inventory: BTreeMap<String, u64>,
    player: Player,
    drones: Vec<Drone>,
    rng: StdRng,
}

impl FactoryWorld {
    /// Build the starting factory. Same `seed`, same run.
    pub fn new(session_name: impl Into<String>, seed: u64) -> Self {
        let circuits = vec![
            PowerCircuit::new(1, 42.0, 100.0),
            PowerCircuit::new(2, 110.0, 0.0),
        ];
        let generators = vec![
            generator(1, GeneratorKind::Biomass, 1, 30.0),
            generator(2, GeneratorKind::Biomass, 1, 30.0),
            generator(3, GeneratorKind::Fuel, 2, 150.0),
        ];
        let production = [
            ("Iron Plate", 20.0),
            ("Iron Rod", 15.0),
            ("Screw", 40.0),
            ("Concrete", 15.0),
        ]
        .into_iter()
        .map(|(item, rate)| ProductionLine {
            item: item.to_owned(),
            max_per_minute: rate,
            current_per_minute: 0.0,
            total_produced: 0,
            carry: 0.0,
        })
        .collect();
        let drones = vec![Drone {
            id: 1,
            home_station: String::from("North Hub"),
            paired_station: String::from("Quarry"),
            speed_kmh: 216.0,
            mode: DroneMode::Outbound,
            progress: 0.0,
            trip_secs: 45.0,
        }];

        Self {
            tick: 0,
            elapsed_secs: 0.0,
            session_name: session_name.into(),
            circuits,
            generators,
            production,
            inventory: BTreeMap::new(),
            player: Player {
                name: String::from("Pioneer"),
                position: [0.0, 0.0, 0.0],
                rotation: 0.0,
                speed: 4.0,
                health: 100.0,
                heading: 0.0,
            },
            drones,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Advance the world by `dt_secs` simulated seconds.
    pub fn advance(&mut self, dt_secs: f64) {
        let dt = dt_secs.max(0.0);
        self.tick = self.tick.saturating_add(1);
        self.elapsed_secs += dt;

        self.burn_fuel(dt);
        self.balance_circuits(dt);
        self.run_production(dt);
        self.move_player(dt);
        self.fly_drones(dt);
    }

    /// Copy the endpoint-visible state.
    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            tick: self.tick,
            elapsed_secs: self.elapsed_secs,
            session_name: self.session_name.clone(),
            circuits: self.circuits.clone(),
            generators: self.generators.clone(),
            production: self.production.clone(),
            inventory: self.inventory.clone(),
        }
    }

    /// Ticks advanced so far.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// The player.
    pub const fn player(&self) -> &Player {
        &self.player
    }

    /// Drones in the world.
    pub fn drones(&self) -> &[Drone] {
        &self.drones
    }

    fn burn_fuel(&mut self, dt: f64) {
        for generator in &mut self.generators {
            if generator.fuel <= 0.0 {
                // The player tops the tank back up.
                generator.fuel = FUEL_TANK;
            }
            let load = if generator.capacity_mw > 0.0 {
                generator.output_mw / generator.capacity_mw
            } else {
                0.0
            };
            generator.fuel = (generator.fuel - load * FUEL_BURN_PER_SEC * dt).max(0.0);
        }
    }

    fn balance_circuits(&mut self, dt: f64) {
        for circuit in &mut self.circuits {
            let jitter = self.rng.random_range(-DEMAND_JITTER..=DEMAND_JITTER);
            let demand = circuit.base_demand_mw * (1.0 + jitter);
            let feeding = self
                .generators
                .iter_mut()
                .filter(|g| g.circuit_id == circuit.id);

            let mut capacity = 0.0;
            let mut fuelled: Vec<&mut Generator> = Vec::new();
            for generator in feeding {
                if generator.fuel > 0.0 {
                    capacity += generator.capacity_mw;
                    fuelled.push(generator);
                } else {
                    generator.output_mw = 0.0;
                }
            }
            circuit.capacity_mw = capacity;

            if circuit.fuse_triggered {
                circuit.fuse_cooldown -= dt;
                if circuit.fuse_cooldown <= 0.0 {
                    circuit.fuse_triggered = false;
                }
            }

            let battery_room = circuit.battery_capacity_mwh > 0.0;
            let drawable_from_battery = if battery_room && circuit.battery_store_mwh > 0.0 {
                f64::INFINITY
            } else {
                0.0
            };

            if !circuit.fuse_triggered && demand > capacity + drawable_from_battery {
                circuit.fuse_triggered = true;
                circuit.fuse_cooldown = FUSE_RESET_SECS;
            }

            let consumed = if circuit.fuse_triggered { 0.0 } else { demand };
            let production = consumed.min(capacity);
            let load = if capacity > 0.0 { production / capacity } else { 0.0 };
            for generator in fuelled {
                generator.output_mw = generator.capacity_mw * load;
            }

            // Spare capacity charges the batteries, a shortfall drains them.
            let differential = if battery_room {
                if capacity > consumed { capacity - consumed } else { production - consumed }
            } else {
                0.0
            };
            circuit.battery_differential_mw = differential;
            circuit.battery_store_mwh = (circuit.battery_store_mwh + differential * dt / 3600.0)
                .clamp(0.0, circuit.battery_capacity_mwh);

            circuit.production_mw = production;
            circuit.consumed_mw = consumed;
            circuit.max_consumed_mw = circuit.max_consumed_mw.max(demand);
        }
    }

    fn run_production(&mut self, dt: f64) {
        let powered = self.circuits.iter().all(|c| !c.fuse_triggered);
        for line in &mut self.production {
            line.current_per_minute = if powered { line.max_per_minute } else { 0.0 };
            line.carry += line.current_per_minute * dt / 60.0;
            let whole = line.carry.floor();
            if whole >= 1.0 {
                line.carry -= whole;
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let made = whole as u64;
                line.total_produced = line.total_produced.saturating_add(made);
                let stored = self.inventory.entry(line.item.clone()).or_insert(0);
                *stored = stored.saturating_add(made);
            }
        }
    }

    fn move_player(&mut self, dt: f64) {
        let player = &mut self.player;
        player.heading = (player.heading + player.speed * dt / 50.0) % std::f64::consts::TAU;
        player.position = [
            50.0 * player.heading.cos(),
            50.0 * player.heading.sin(),
            player.position[2],
        ];
        player.rotation = (player.heading.to_degrees() + 90.0) % 360.0;
    }

    fn fly_drones(&mut self, dt: f64) {
        for drone in &mut self.drones {
            if drone.trip_secs <= 0.0 {
                continue;
            }
            drone.progress += dt / drone.trip_secs;
            if drone.progress >= 1.0 {
                drone.progress = 0.0;
                drone.mode = match drone.mode {
                    DroneMode::Outbound => DroneMode::Returning,
                    DroneMode::Returning => DroneMode::Outbound,
                };
            }
        }
    }
}

fn generator(id: u32, kind: GeneratorKind, circuit_id: u32, capacity_mw: f64) -> Generator {
    Generator {
        id,
        kind,
        circuit_id,
        capacity_mw,
        output_mw: 0.0,
        fuel: FUEL_TANK,
    }
}

/// Format a duration in seconds as `HH:MM:SS`.
pub fn seconds_to_time_string(secs: f64) -> String {
    if !secs.is_finite() || secs <= 0.0 {
        return String::from("00:00:00");
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let total = secs.floor() as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(world: &mut FactoryWorld, ticks: u32, dt: f64) {
        for _ in 0..ticks {
            world.advance(dt);
        }
    }

    #[test]
    fn same_seed_same_run() {
        let mut a = FactoryWorld::new("Test", 7);
        let mut b = FactoryWorld::new("Test", 7);
        run(&mut a, 50, 0.1);
        run(&mut b, 50, 0.1);
        assert_eq!(a.snapshot(), b.snapshot());
    }

    #[test]
    fn production_fills_inventory() {
        let mut world = FactoryWorld::new("Test", 1);
        run(&mut world, 600, 0.1);

        let snapshot = world.snapshot();
        assert_eq!(snapshot.tick, 600);
        let screws = snapshot.inventory.get("Screw").copied().unwrap_or(0);
        assert!(screws > 0, "no screws after a minute");
        let line = snapshot.production.iter().find(|l| l.item == "Screw");
        assert_eq!(line.map(|l| l.total_produced), Some(screws));
    }

    #[test]
    fn battery_stays_within_capacity() {
        let mut world = FactoryWorld::new("Test", 3);
        run(&mut world, 2000, 1.0);
        for circuit in world.snapshot().circuits {
            assert!(circuit.battery_store_mwh >= 0.0);
            assert!(circuit.battery_store_mwh <= circuit.battery_capacity_mwh);
            let percent = circuit.battery_percent();
            assert!((0.0..=100.0).contains(&percent));
        }
    }

    #[test]
    fn circuit_without_capacity_trips_its_fuse() {
        let mut world = FactoryWorld::new("Test", 5);
        world.generators.retain(|g| g.circuit_id != 2);
        world.advance(0.1);

        let circuit = world.snapshot().circuits.into_iter().find(|c| c.id == 2);
        assert_eq!(circuit.map(|c| c.fuse_triggered), Some(true));
    }

    #[test]
    fn player_and_drones_move() {
        let mut world = FactoryWorld::new("Test", 9);
        let start = world.player().position;
        run(&mut world, 100, 0.5);
        assert_ne!(world.player().position, start);
        assert!(world.drones().iter().all(|d| d.progress < 1.0));
        assert!(
            world
                .drones()
                .iter()
                .any(|d| d.mode == DroneMode::Returning)
        );
    }

    #[test]
    fn time_strings() {
        assert_eq!(seconds_to_time_string(0.0), "00:00:00");
        assert_eq!(seconds_to_time_string(-5.0), "00:00:00");
        assert_eq!(seconds_to_time_string(f64::INFINITY), "00:00:00");
        assert_eq!(seconds_to_time_string(3725.9), "01:02:05");
    }
}
