use esp_hal::gpio::Input;
use inkdrop_core::platform::Telemetry;

/// Reports the user button. Battery and temperature are not wired on this
/// board and go out as "not reported".
pub struct BoardTelemetry<'d> {
    button: Input<'d>,
    pressed_at_boot: bool,
}

impl<'d> BoardTelemetry<'d> {
    /// `button` is active low.
    pub fn new(button: Input<'d>) -> Self {
        let pressed_at_boot = button.is_low();
        Self {
            button,
            pressed_at_boot,
        }
    }
}

impl Telemetry for BoardTelemetry<'_> {
    fn take_button_press(&mut self) -> bool {
        let pressed = self.pressed_at_boot || self.button.is_low();
        self.pressed_at_boot = false;
        pressed
    }
}
