//! Demo scene: a lit floor, a ring of cubes and two lights
//!
//! Usage: `umbra [scene.json|scene.ron] [config.ron]`
//!
//! Keys: `1` z-buffer shadows, `2` PCF shadows, `P` parallax on/off,
//! `T` next texture filter, `B` half-transparent main pass on/off.

use std::f32::consts::PI;

use umbra::prelude::*;
use umbra::renderer::SamplerKind;

/// Degrees per second the first light's model turns
const LIGHT_SPIN: f32 = 20.0;

/// Day/night change per second
const DAY_NIGHT_SPEED: f32 = 0.1;

/// Seconds before the second light starts to pulse
const PULSE_DELAY: f32 = 15.0;

/// Strength change per second while pulsing
const PULSE_SPEED: f32 = 10.0;

/// Value that runs back and forth between two bounds at a fixed speed
#[derive(Debug, Clone, Copy, PartialEq)]
struct PingPong {
    value: f32,
    min: f32,
    max: f32,
    speed: f32,
    rising: bool,
}

impl PingPong {
    fn new(value: f32, min: f32, max: f32, speed: f32) -> Self {
        Self {
            value: value.clamp(min, max),
            min,
            max,
            speed,
            rising: value < max,
        }
    }

    fn step(&mut self, dt: f32) -> f32 {
        if self.rising {
            self.value += self.speed * dt;
            if self.value >= self.max {
                self.value = self.max;
                self.rising = false;
            }
        } else {
            self.value -= self.speed * dt;
            if self.value <= self.min {
                self.value = self.min;
                self.rising = true;
            }
        }
        self.value
    }
}

/// Demo application
struct Demo {
    /// Set when a scene file supplied the contents
    from_file: bool,
    spinner: Option<ModelId>,
    /// Second light and the strength envelope it pulses through
    pulse: Option<(LightId, PingPong)>,
    day_night: PingPong,
    half_transparent: bool,
}

impl Demo {
    fn new(from_file: bool) -> Self {
        Self {
            from_file,
            spinner: None,
            pulse: None,
            day_night: PingPong::new(1.0, 0.0, 1.0, DAY_NIGHT_SPEED),
            half_transparent: false,
        }
    }

    fn handle_keys(&mut self, ctx: &mut EngineContext) {
        let scene = &mut ctx.scene;
        let input = &ctx.input;

        if input.key_hit(KeyCode::Digit1) {
            scene.set_shadow_technique(ShadowTechnique::ZBuffer);
        }
        if input.key_hit(KeyCode::Digit2) {
            scene.set_shadow_technique(ShadowTechnique::Pcf);
        }
        if input.key_hit(KeyCode::KeyP) {
            let enabled = !scene.parallax();
            scene.set_parallax(enabled);
            log::info!("Parallax {}", if enabled { "on" } else { "off" });
        }
        if input.key_hit(KeyCode::KeyT) {
            let next = next_sampler(scene.sampler());
            scene.set_sampler(next);
            log::info!("Texture filter: {}", next.name());
        }
        if input.key_hit(KeyCode::KeyB) {
            self.half_transparent = !self.half_transparent;
            scene.set_blend_amount(if self.half_transparent { 0.5 } else { 1.0 });
        }
    }

    fn build_default_scene(&self, ctx: &mut EngineContext) -> Result<(), EngineError> {
        let scene = &mut ctx.scene;
        let backend = &mut ctx.backend;

        scene
            .create_model("primitive:plane", backend)
            .map_err(|e| EngineError::Application(e.to_string()))?;

        for i in 0..6 {
            let angle = i as f32 * PI / 3.0;
            let id = scene
                .create_model("primitive:cube", backend)
                .map_err(|e| EngineError::Application(e.to_string()))?;
            if let Some(model) = scene.model_mut(id) {
                model.set_position(Vec3::new(angle.cos() * 25.0, 5.0, angle.sin() * 25.0));
                model.set_rotation(Vec3::new(0.0, angle, 0.0));
                model.set_scale(2.0);
            }
        }

        let sphere = scene
            .load_mesh("primitive:sphere", backend)
            .map_err(|e| EngineError::Application(e.to_string()))?;

        let sun = LightDesc::new(LightKind::Directional)
            .with_colour(Vec4::new(1.0, 1.0, 0.9, 1.0))
            .with_strength(0.1)
            .with_ambient(Vec3::new(0.2, 0.2, 0.3));
        let sun = scene
            .add_light(sun, sphere.clone(), Vec3::new(0.0, 80.0, -40.0), backend)
            .map_err(|e| EngineError::Application(e.to_string()))?;
        if let Some(model) = scene.light_model_mut(sun) {
            model.set_rotation(Vec3::new(60f32.to_radians(), 0.0, 0.0));
            model.set_scale(2.0);
        }

        let lamp = LightDesc::new(LightKind::Point)
            .with_colour(Vec4::new(1.0, 0.8, 0.6, 1.0))
            .with_strength(10.0)
            .with_specular_power(256.0);
        let lamp = scene
            .add_light(lamp, sphere, Vec3::new(4.5, 22.0, 0.0), backend)
            .map_err(|e| EngineError::Application(e.to_string()))?;
        if let Some(model) = scene.light_model_mut(lamp) {
            model.set_scale(0.5);
        }
        scene.set_shadow_light(lamp);

        Ok(())
    }
}

impl Application for Demo {
    fn init(&mut self, ctx: &mut EngineContext) -> Result<(), EngineError> {
        log::info!("Initializing demo");

        let camera = ctx.scene.camera_mut();
        camera.position = Vec3::new(0.0, 50.0, -100.0);
        camera.rotation = Vec3::new(30f32.to_radians(), 0.0, 0.0);

        if !self.from_file {
            self.build_default_scene(ctx)?;
        }

        // The first light's proxy spins and the second one pulses
        let mut lights = ctx.scene.lights().iter();
        self.spinner = lights.next().map(|light| light.model());
        self.pulse = lights.next().map(|light| {
            let envelope = PingPong::new(light.strength(), 0.0, light.strength(), PULSE_SPEED);
            (light.id(), envelope)
        });
        ctx.scene.set_day_night(self.day_night.value);
        Ok(())
    }

    fn update(&mut self, ctx: &mut EngineContext) {
        let dt = ctx.time.delta_seconds();
        if let Some(id) = self.spinner {
            if let Some(model) = ctx.scene.model_mut(id) {
                model.rotate_y((LIGHT_SPIN * dt).to_radians());
            }
        }

        let day_night = self.day_night.step(dt);
        ctx.scene.set_day_night(day_night);

        if ctx.time.elapsed_seconds() > PULSE_DELAY {
            if let Some((id, envelope)) = &mut self.pulse {
                let strength = envelope.step(dt);
                if let Some(light) = ctx.scene.light_mut(*id) {
                    light.set_strength(strength);
                }
            }
        }

        self.handle_keys(ctx);
    }

    fn shutdown(&mut self, ctx: &mut EngineContext) {
        log::info!("{}", ctx.stats.format_stats());
    }
}

fn next_sampler(current: SamplerKind) -> SamplerKind {
    let index = SamplerKind::ALL
        .iter()
        .position(|&kind| kind == current)
        .unwrap_or(0);
    SamplerKind::ALL[(index + 1) % SamplerKind::ALL.len()]
}

fn main() {
    let mut args = std::env::args().skip(1);
    let scene_file = args.next();
    let config_file = args.next();

    let config = match config_file {
        Some(path) => match EngineConfig::load_ron(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        },
        None => EngineConfig::default().with_size(1280, 720).with_vsync(true),
    };
    let config = match &scene_file {
        Some(path) => config.with_scene_file(path),
        None => config,
    };

    let engine = Engine::new(config, Demo::new(scene_file.is_some()));
    if let Err(e) = engine.run() {
        eprintln!("Engine error: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_pong_turns_at_bounds() {
        let mut envelope = PingPong::new(10.0, 0.0, 10.0, 10.0);
        assert_eq!(envelope.step(0.5), 5.0);
        assert_eq!(envelope.step(0.6), 0.0);
        assert_eq!(envelope.step(0.25), 2.5);
    }

    #[test]
    fn test_day_night_starts_falling_from_midday() {
        let mut cycle = PingPong::new(1.0, 0.0, 1.0, DAY_NIGHT_SPEED);
        let value = cycle.step(1.0);
        assert!((value - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_sampler_cycle_wraps() {
        let mut kind = SamplerKind::default();
        for _ in 0..SamplerKind::ALL.len() {
            kind = next_sampler(kind);
        }
        assert_eq!(kind, SamplerKind::default());
    }
}
