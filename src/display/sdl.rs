//! SDL2 window surface
//!
//! Processed images and raw previews are streamed into an RGBA texture scaled
//! to the window. The status line is shown in the window title.

use image::RgbaImage;
use sdl2::event::Event;
use sdl2::pixels::{Color, PixelFormatEnum};
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use sdl2::EventPump;
use tracing::{info, warn};

use crate::display::DisplaySurface;
use crate::error::DisplayError;

const TITLE: &str = "edgecam";
const PREVIEW_FILL: Color = Color::RGB(24, 24, 24);

fn surface_error(e: impl ToString) -> DisplayError {
    DisplayError::Surface(e.to_string())
}

/// SDL rejects titles containing NUL, so those are dropped from the status.
fn window_title(status: &str) -> String {
    let status: String = status.chars().filter(|&c| c != '\0').collect();
    format!("{} - {}", TITLE, status)
}

pub struct Sdl2Surface {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    event_pump: EventPump,
    preview: Option<RgbaImage>,
    closed: bool,
}

impl Sdl2Surface {
    pub fn new(width: u32, height: u32) -> Result<Self, DisplayError> {
        let sdl_context = sdl2::init().map_err(surface_error)?;
        let video_subsystem = sdl_context.video().map_err(surface_error)?;

        let window = video_subsystem
            .window(TITLE, width, height)
            .position_centered()
            .resizable()
            .build()
            .map_err(surface_error)?;

        let canvas = window
            .into_canvas()
            .present_vsync()
            .build()
            .map_err(surface_error)?;
        let texture_creator = canvas.texture_creator();
        let event_pump = sdl_context.event_pump().map_err(surface_error)?;

        info!("SDL2 window opened at {}x{}", width, height);
        Ok(Self {
            canvas,
            texture_creator,
            event_pump,
            preview: None,
            closed: false,
        })
    }
}

impl Sdl2Surface {
    fn draw(&mut self, image: &RgbaImage) -> Result<(), DisplayError> {
        let (width, height) = image.dimensions();
        let mut texture = self
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::RGBA32, width, height)
            .map_err(surface_error)?;
        texture
            .update(None, image.as_raw(), width as usize * 4)
            .map_err(surface_error)?;

        self.canvas.clear();
        self.canvas
            .copy(&texture, None, None)
            .map_err(surface_error)?;
        self.canvas.present();
        Ok(())
    }
}

impl DisplaySurface for Sdl2Surface {
    fn show(&mut self, image: &RgbaImage) -> Result<(), DisplayError> {
        self.draw(image)
    }

    fn show_preview(&mut self, image: &RgbaImage) -> Result<(), DisplayError> {
        self.draw(image)?;
        self.preview = Some(image.clone());
        Ok(())
    }

    fn clear(&mut self) -> Result<(), DisplayError> {
        if let Some(preview) = self.preview.take() {
            let drawn = self.draw(&preview);
            self.preview = Some(preview);
            return drawn;
        }
        self.canvas.set_draw_color(PREVIEW_FILL);
        self.canvas.clear();
        self.canvas.present();
        Ok(())
    }

    fn set_status(&mut self, status: &str) {
        let title = window_title(status);
        if self.canvas.window().title() != title {
            if let Err(e) = self.canvas.window_mut().set_title(&title) {
                warn!("Failed to set window title: {}", e);
            }
        }
    }

    fn closed(&mut self) -> bool {
        for event in self.event_pump.poll_iter() {
            if let Event::Quit { .. } = event {
                info!("Quit event received");
                self.closed = true;
            }
        }
        self.closed
    }
}
