//! Frame driver demo: an orbit camera over a small scene with opaque and
//! transparent meshes under two lights.
//!
//! Controls:
//! - left mouse drag — orbit the camera
//! - scroll — zoom
//! - `W` — toggle wireframe rendering
//! - `S` — toggle the shadow-map preview
//! - `P` — toggle perspective/orthographic projection

use std::sync::Arc;
use std::time::Instant;

use veil::{
    Camera, ForwardPipeline, FullscreenPipeline, GpuContext, Light, Mat4, Material, Mesh,
    MeshStore, Node, NodeId, OitPipeline, Quat, RenderContext, RenderList, Scene, SceneTargets,
    Texture, Vec3,
};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

/// Spherical-coordinate orbit around a target point.
struct Orbit {
    target: Vec3,
    distance: f32,
    azimuth: f32,
    polar: f32,
}

impl Orbit {
    fn camera(&self, aspect: f32, perspective: bool) -> Camera {
        let eye = self.target
            + self.distance
                * Vec3::new(
                    self.polar.cos() * self.azimuth.sin(),
                    self.polar.sin(),
                    self.polar.cos() * self.azimuth.cos(),
                );
        let projection = if perspective {
            Camera::perspective(std::f32::consts::FRAC_PI_3, aspect, 0.1, 100.0)
        } else {
            Camera::orthographic(self.distance * 0.5, aspect, 0.1, 100.0)
        };
        Camera::looking_at(eye, self.target, Vec3::Y, projection)
    }
}

struct Running {
    window: Arc<Window>,
    gpu: GpuContext,
    scene: Scene,
    store: MeshStore,
    spinner: NodeId,
    list: RenderList,
    targets: SceneTargets,
    forward: ForwardPipeline,
    oit: OitPipeline,
    fullscreen: FullscreenPipeline,
    orbit: Orbit,
    perspective: bool,
    show_shadow_map: bool,
    dragging: bool,
    last_cursor: Option<(f64, f64)>,
    start_time: Instant,
}

enum App {
    Pending,
    Running(Box<Running>),
}

fn build_scene(gpu: &GpuContext) -> (Scene, MeshStore, NodeId) {
    let mut store = MeshStore::new();
    let cube = store.add_mesh(Mesh::cube(gpu));
    let sphere = store.add_mesh(Mesh::sphere(gpu, 32, 16));
    let floor = store.add_mesh(Mesh::plane(gpu, 12.0));
    let checker = store.add_texture(Texture::checkerboard(gpu, 256, 8));

    let mut scene = Scene::new();
    let root = scene.root();

    scene
        .add(
            root,
            Node::light("key light", Light::new(Vec3::ONE, Vec3::splat(0.08)))
                .with_transform(Mat4::from_translation(Vec3::new(6.0, 8.0, 4.0))),
        )
        .unwrap();
    scene
        .add(
            root,
            Node::light(
                "fill light",
                Light::new(Vec3::new(0.9, 0.6, 0.3), Vec3::splat(0.02)),
            )
            .with_transform(Mat4::from_translation(Vec3::new(-5.0, 6.0, -3.0))),
        )
        .unwrap();

    scene
        .add(
            root,
            Node::mesh(
                "floor",
                floor,
                Material::with_albedo(Vec3::splat(0.9)).albedo_texture(checker),
            ),
        )
        .unwrap();

    let spinner = scene.add(root, Node::group("spinner")).unwrap();
    scene
        .add(
            spinner,
            Node::mesh("crate", cube, Material::with_albedo(Vec3::new(0.7, 0.5, 0.3)))
                .with_transform(Mat4::from_translation(Vec3::new(1.5, 0.5, 0.0))),
        )
        .unwrap();
    scene
        .add(
            spinner,
            Node::mesh(
                "marble",
                sphere,
                Material::with_albedo(Vec3::new(0.3, 0.4, 0.8)).roughness(0.2),
            )
            .with_transform(Mat4::from_translation(Vec3::new(-1.5, 0.5, 0.0))),
        )
        .unwrap();

    // Overlapping translucent shells around the center, the OIT stress
    // case: their draw order never matters.
    for (i, (color, opacity, radius)) in [
        (Vec3::new(0.9, 0.2, 0.2), 0.35, 2.2),
        (Vec3::new(0.2, 0.9, 0.2), 0.45, 1.6),
        (Vec3::new(0.2, 0.4, 0.9), 0.55, 1.0),
    ]
    .into_iter()
    .enumerate()
    {
        scene
            .add(
                root,
                Node::mesh(
                    format!("shell {i}"),
                    sphere,
                    Material::with_albedo(color).opacity(opacity),
                )
                .with_transform(
                    Mat4::from_translation(Vec3::new(0.0, 1.2, 0.0))
                        * Mat4::from_scale(Vec3::splat(radius * 2.0)),
                ),
            )
            .unwrap();
    }

    (scene, store, spinner)
}

impl Running {
    fn new(window: Arc<Window>) -> Self {
        let gpu = GpuContext::new(window.clone());
        let (scene, store, spinner) = build_scene(&gpu);
        let targets = SceneTargets::new(&gpu);
        let forward = ForwardPipeline::new(&gpu);
        let oit = OitPipeline::new(&gpu);
        let fullscreen = FullscreenPipeline::new(&gpu);

        Self {
            window,
            gpu,
            scene,
            store,
            spinner,
            list: RenderList::new(),
            targets,
            forward,
            oit,
            fullscreen,
            orbit: Orbit {
                target: Vec3::new(0.0, 1.0, 0.0),
                distance: 9.0,
                azimuth: 0.6,
                polar: 0.5,
            },
            perspective: true,
            show_shadow_map: false,
            dragging: false,
            last_cursor: None,
            start_time: Instant::now(),
        }
    }

    fn redraw(&mut self) {
        let frame = match self.gpu.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("skipping frame: {err}");
                self.gpu
                    .surface
                    .configure(&self.gpu.device, &self.gpu.config);
                return;
            }
        };
        let swapchain_view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        // Animate the spinner group; world matrices are recomputed by the
        // traversal below.
        let elapsed = self.start_time.elapsed().as_secs_f32();
        if let Ok(node) = self.scene.node_mut(self.spinner) {
            node.local = Mat4::from_quat(Quat::from_rotation_y(elapsed * 0.6));
        }

        self.targets.ensure_size(&self.gpu);

        self.list.reset();
        if self.list.process(&self.scene, self.scene.root()).is_err() {
            return;
        }

        let camera = self.orbit.camera(self.gpu.aspect(), self.perspective);

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });
        let mut ctx = RenderContext {
            gpu: &self.gpu,
            encoder: &mut encoder,
            scene: &self.scene,
            meshes: &self.store,
        };

        // Fixed pass order: shadow+forward, then transparency, then the
        // fullscreen composite. A failing pipeline drops its contribution
        // for this frame and the rest continue.
        if let Err(err) = self.forward.render(&mut ctx, &camera, &self.list, &self.targets) {
            log::error!("forward pass failed: {err}");
        }
        if let Err(err) = self.oit.render(&mut ctx, &camera, &self.list, &self.targets) {
            log::error!("transparency pass failed: {err}");
        }
        if self.show_shadow_map {
            self.fullscreen
                .render_depth(&mut ctx, self.forward.shadow().map_view(), &swapchain_view);
        } else {
            self.fullscreen
                .render(&mut ctx, &self.targets.color_view, &swapchain_view);
        }

        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        frame.present();
        self.window.request_redraw();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if matches!(self, App::Pending) {
            let attrs = WindowAttributes::default()
                .with_title("veil — orbit demo")
                .with_inner_size(winit::dpi::LogicalSize::new(1280, 720));
            let window = Arc::new(event_loop.create_window(attrs).unwrap());
            window.request_redraw();
            *self = App::Running(Box::new(Running::new(window)));
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let App::Running(app) = self else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                app.gpu.resize(size.width, size.height);
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed && !event.repeat {
                    match event.physical_key {
                        PhysicalKey::Code(KeyCode::KeyW) => {
                            let flag = !app.forward.wireframe();
                            app.forward.set_wireframe(flag);
                            app.oit.set_wireframe(flag);
                        }
                        PhysicalKey::Code(KeyCode::KeyS) => {
                            app.show_shadow_map = !app.show_shadow_map;
                        }
                        PhysicalKey::Code(KeyCode::KeyP) => {
                            app.perspective = !app.perspective;
                        }
                        PhysicalKey::Code(KeyCode::Escape) => event_loop.exit(),
                        _ => {}
                    }
                }
            }
            WindowEvent::MouseInput { state, button, .. } => {
                if button == MouseButton::Left {
                    app.dragging = state == ElementState::Pressed;
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                if let Some((last_x, last_y)) = app.last_cursor
                    && app.dragging
                {
                    let dx = (position.x - last_x) as f32;
                    let dy = (position.y - last_y) as f32;
                    app.orbit.azimuth -= dx * 0.01;
                    app.orbit.polar = (app.orbit.polar + dy * 0.01).clamp(-1.4, 1.4);
                }
                app.last_cursor = Some((position.x, position.y));
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let amount = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 40.0,
                };
                app.orbit.distance = (app.orbit.distance - amount).clamp(2.0, 40.0);
            }
            WindowEvent::RedrawRequested => app.redraw(),
            _ => {}
        }
    }
}

fn main() {
    env_logger::init();

    let event_loop = EventLoop::new().unwrap();
    event_loop.set_control_flow(ControlFlow::Poll);
    let mut app = App::Pending;
    event_loop.run_app(&mut app).unwrap();
}
