use std::sync::Arc;

use anyhow::Context;
use multipass_core::fatal::{self, ErrorAction};
use multipass_core::{FrameOutcome, MultipassError};
use winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

mod app;
mod config;
mod logging;

use app::App;
use config::AppConfig;
use logging::{init_logging, LoggingConfig};

// ---------------------------------------------------------------------------
// Handler: winit ApplicationHandler driving the renderer callbacks
// ---------------------------------------------------------------------------

struct Handler {
    config: AppConfig,
    app: Option<App>,
}

impl Handler {
    fn new(config: AppConfig) -> Self {
        Self { config, app: None }
    }

    fn create_app(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<App> {
        let (width, height) = self.config.size;
        let window_attrs = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(winit::dpi::LogicalSize::new(width, height));

        let window = Arc::new(
            event_loop
                .create_window(window_attrs)
                .context("failed to create window")?,
        );
        log::info!("window created ({width}×{height})");

        App::new(window, &self.config)
    }

    /// Allocation failures end the process. Other errors are reported and
    /// the loop keeps running unless the renderer has terminated.
    fn fail(&mut self, event_loop: &ActiveEventLoop, err: MultipassError) {
        let Some(app) = &self.app else {
            log::error!("{err}; exiting");
            event_loop.exit();
            return;
        };
        match fatal::action_for(&err, app.state()) {
            ErrorAction::ExitProcess => fatal::terminate_after_delay(&err, app.sink()),
            ErrorAction::StopRendering => {
                log::error!("{err}; exiting");
                event_loop.exit();
            }
            ErrorAction::Continue => app.sink().report(&fatal::recovered_diagnostic(&err)),
        }
    }
}

impl ApplicationHandler for Handler {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.app.is_some() {
            return;
        }
        match self.create_app(event_loop) {
            Ok(app) => self.app = Some(app),
            Err(err) => {
                log::error!("startup failed: {err:#}");
                event_loop.exit();
                return;
            }
        }
        if let Some(Err(err)) = self.app.as_mut().map(App::load) {
            self.fail(event_loop, err);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(app) = &mut self.app else {
            return;
        };

        match event {
            WindowEvent::CloseRequested
            | WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                log::info!("close requested; exiting");
                app.close();
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                if let Err(err) = app.resize(new_size.width, new_size.height) {
                    self.fail(event_loop, err);
                }
            }

            WindowEvent::RedrawRequested => match app.render() {
                Ok(FrameOutcome::Presented | FrameOutcome::Skipped) => {}
                Ok(FrameOutcome::SurfaceFailed) => {
                    log::error!("surface lost for good; exiting");
                    app.close();
                    event_loop.exit();
                }
                Err(err) => self.fail(event_loop, err),
            },

            _ => {}
        }
    }

    /// Continuous redraws; the close signal is observed before the next tick.
    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if event_loop.exiting() {
            return;
        }
        if let Some(app) = self.app.as_ref().filter(|app| app.is_running()) {
            app.request_redraw();
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_logging(LoggingConfig::default());

    let event_loop = EventLoop::new().context("failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut handler = Handler::new(AppConfig::from_env());
    event_loop.run_app(&mut handler).context("event loop error")?;
    Ok(())
}
