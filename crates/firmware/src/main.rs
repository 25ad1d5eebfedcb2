//! Organum is [Embassy](https://embassy.dev)-based firmware that turns a scanned organ or piano key matrix into a
//! USB-MIDI controller. The firmware runs on the [Nucleo-F767ZI development
//! board](https://www.st.com/en/evaluation-tools/nucleo-f767zi.html), which is powered by an F7-series
//! STM32 microcontroller.
//!
//! Keys are read through break and make contacts so that their travel time gives a velocity. Notes then go through
//! the keyboard zones, or through the arpeggiator and chord engine, to up to four USB cables. Musical time comes from
//! an internal tempo or follows MIDI Timing Clock received over USB.
//!
//! For details about the hardware or how to use the device, see the `README`.

#![no_std]
#![no_main]

mod flash;
mod matrix;
mod midi_out;

use crate::{
    flash::FlashStorage,
    matrix::{Matrix, ROWS},
    midi_out::{PACKETS, UsbMidiOutput},
};
use defmt::{panic, *};
use embassy_executor::Spawner;
use embassy_stm32::{
    Config, bind_interrupts,
    exti::ExtiInput,
    flash::Flash,
    gpio::{Input, Level, Output, Pull, Speed},
    peripherals,
    time::Hertz,
    usb,
};
use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    mutex,
    watch::{AnonReceiver, Sender, Watch},
};
use embassy_time::{Duration, Instant, Ticker, Timer};
use embassy_usb::{
    Builder, UsbDevice,
    class::midi::{MidiClass, Receiver as MidiReceiver, Sender as MidiSender},
    driver::EndpointError,
};
use organum_lib::{
    configuration::{ArpMode, MATRIX_COLUMNS},
    controller::Controller,
};
use static_cell::StaticCell;
use wmidi::Note;

#[cfg(feature = "debug")]
use {defmt_rtt as _, panic_probe as _};
#[cfg(not(feature = "debug"))]
use panic_halt as _;

bind_interrupts!(
    #[doc(hidden)]
    struct Irqs {
        OTG_FS => usb::InterruptHandler<peripherals::USB_OTG_FS>;
    }
);

type OrganController = Controller<UsbMidiOutput, fn(usize, Note), FlashStorage>;
type ControllerAsyncMutex = mutex::Mutex<CriticalSectionRawMutex, OrganController>;
type UsbDriver = usb::Driver<'static, peripherals::USB_OTG_FS>;

const ARP_MODE_RECEIVER_CNT: usize = 0;
type ArpModeSync = Watch<CriticalSectionRawMutex, ArpMode, ARP_MODE_RECEIVER_CNT>;
type ArpModeSender<'a> = Sender<'a, CriticalSectionRawMutex, ArpMode, ARP_MODE_RECEIVER_CNT>;
type ArpModeSpy<'a> = AnonReceiver<'a, CriticalSectionRawMutex, ArpMode, ARP_MODE_RECEIVER_CNT>;

/// Publishes the arpeggiator mode to the status LED.
static ARP_MODE_SYNC: ArpModeSync = Watch::new();

/// Interval between two scans of the whole key matrix.
const SCAN_PERIOD: Duration = Duration::from_micros(250);

/// Number of zones the split-learn button divides the keyboard into.
const LEARNED_ZONE_CNT: usize = 2;

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Initializing Organum");

    let mut config = Config::default();
    {
        use embassy_stm32::rcc::*;
        // hse: high-speed external clock
        config.rcc.hse = Some(Hse {
            freq: Hertz(8_000_000),
            mode: HseMode::Bypass,
        });

        // pll: phase-locked loop, crucial for dividing clock
        config.rcc.pll_src = PllSource::HSE;
        config.rcc.pll = Some(Pll {
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL216,
            divp: Some(PllPDiv::DIV2), // 8mhz / 4 * 216 / 2 = 216Mhz
            // per section 5.2 of RM0410: the 48MHz clock used for USB OTG FS is derived from main PLL VCO (PLLQ clock)
            divq: Some(PllQDiv::DIV9), // 8mhz / 4 * 216 / 9 = 48Mhz
            divr: None,
        });
        config.rcc.ahb_pre = AHBPrescaler::DIV1;
        config.rcc.apb1_pre = APBPrescaler::DIV4;
        config.rcc.apb2_pre = APBPrescaler::DIV2;
        config.rcc.sys = Sysclk::PLL1_P;
        config.rcc.mux.clk48sel = mux::Clk48sel::PLL1_Q;
    }
    let p = embassy_stm32::init(config);

    let storage = FlashStorage::new(Flash::new_blocking(p.FLASH));
    static CONTROLLER: StaticCell<ControllerAsyncMutex> = StaticCell::new();
    let controller = CONTROLLER.init(mutex::Mutex::new(Controller::load(
        UsbMidiOutput,
        zone_learned as fn(usize, Note),
        storage,
    )));

    let arp_mode_sender = ARP_MODE_SYNC.sender();
    arp_mode_sender.send(controller.lock().await.arpeggiator().settings().mode);

    // rows idle high and are pulled low one at a time; closed contacts pull their column low
    let rows: [Output<'static>; ROWS] = [
        Output::new(p.PE0, Level::High, Speed::VeryHigh),
        Output::new(p.PE1, Level::High, Speed::VeryHigh),
        Output::new(p.PE2, Level::High, Speed::VeryHigh),
        Output::new(p.PE3, Level::High, Speed::VeryHigh),
        Output::new(p.PE4, Level::High, Speed::VeryHigh),
        Output::new(p.PE5, Level::High, Speed::VeryHigh),
        Output::new(p.PE6, Level::High, Speed::VeryHigh),
        Output::new(p.PE7, Level::High, Speed::VeryHigh),
    ];
    let columns: [Input<'static>; MATRIX_COLUMNS] = [
        Input::new(p.PF0, Pull::Up),
        Input::new(p.PF1, Pull::Up),
        Input::new(p.PF2, Pull::Up),
        Input::new(p.PF3, Pull::Up),
        Input::new(p.PF4, Pull::Up),
        Input::new(p.PF5, Pull::Up),
        Input::new(p.PF6, Pull::Up),
        Input::new(p.PF7, Pull::Up),
        Input::new(p.PF8, Pull::Up),
        Input::new(p.PF9, Pull::Up),
        Input::new(p.PF10, Pull::Up),
        Input::new(p.PF11, Pull::Up),
        Input::new(p.PF12, Pull::Up),
        Input::new(p.PF13, Pull::Up),
        Input::new(p.PF14, Pull::Up),
        Input::new(p.PF15, Pull::Up),
    ];
    unwrap!(spawner.spawn(scan_task(Matrix::new(rows, columns), controller)));

    let button = ExtiInput::new(p.PC13, p.EXTI13, Pull::None);
    unwrap!(spawner.spawn(arp_mode_input_task(button, controller, arp_mode_sender)));

    let red_led = Output::new(p.PB14, Level::Low, Speed::Low);
    unwrap!(spawner.spawn(arp_mode_display_task(red_led, ARP_MODE_SYNC.anon_receiver())));

    let toggle = ExtiInput::new(p.PD1, p.EXTI1, Pull::Up);
    let blue_led = Output::new(p.PB7, Level::Low, Speed::Low);
    unwrap!(spawner.spawn(split_learn_input_task(toggle, blue_led, controller)));

    // Create the driver, from the HAL.
    static ENDPOINT_OUT_BUFFER: StaticCell<[u8; 256]> = StaticCell::new();
    let mut config = embassy_stm32::usb::Config::default();

    // USB devices which are self-powered (i.e., that can stay powered on if unplugged from the host)
    // need to enable vbus_detection to comply with the USB spec. Per section 6.10 of the Nucleo board
    // manual (UM1974), CN13 (the USB port) cannot power the board; external power is necessary.
    config.vbus_detection = true;

    let driver = usb::Driver::new_fs(
        p.USB_OTG_FS,
        Irqs,
        p.PA12,
        p.PA11,
        ENDPOINT_OUT_BUFFER.init([0; 256]),
        config,
    );

    // per https://pid.codes, FOSS projects can apply to be listed under the vendor ID owned by InterBiometrics
    let vendor_id = 0x1209;
    let product_id = 0x0A6F;

    let mut config = embassy_usb::Config::new(vendor_id, product_id);
    config.manufacturer = Some("Organum");
    config.product = Some("Organum MIDI Controller");
    config.self_powered = true;
    config.max_power = 0;

    // Create embassy-usb DeviceBuilder using the driver and config.
    // It needs some buffers for building the descriptors.
    static CONFIG_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
    static BOS_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
    static CONTROL_BUFFER: StaticCell<[u8; 64]> = StaticCell::new();

    let mut builder = Builder::new(
        driver,
        config,
        CONFIG_DESCRIPTOR.init([0; 256]),
        BOS_DESCRIPTOR.init([0; 256]),
        &mut [], // no msos descriptors
        CONTROL_BUFFER.init([0; 64]),
    );

    // one jack in for clock and transport, four jacks out for the USB cables
    let class = MidiClass::new(&mut builder, 1, 4, 64);
    let (midi_sender, midi_receiver) = class.split();

    let usb = builder.build();

    unwrap!(spawner.spawn(usb_task(usb)));
    unwrap!(spawner.spawn(midi_in_task(midi_receiver, controller)));
    unwrap!(spawner.spawn(midi_out_task(midi_sender)));
    unwrap!(spawner.spawn(clock_task(controller)));
}

/// Reports split points picked on the keyboard.
fn zone_learned(zone: usize, note: Note) {
    info!("Zone {} now starts at {}", zone + 1, note.to_str());
}

/// Task responsible for reading the key matrix.
///
/// Every row is read under one lock so that all keys of a scan share the same view of the settings.
#[embassy_executor::task]
async fn scan_task(mut matrix: Matrix, controller: &'static ControllerAsyncMutex) -> ! {
    let mut ticker = Ticker::every(SCAN_PERIOD);
    loop {
        ticker.next().await;
        let mut controller = controller.lock().await;
        let rows = usize::from(controller.keyboard().num_rows).min(ROWS);
        for row in 0..rows {
            let columns = matrix.read_row(row);
            controller.scan_row(row, columns, Instant::now());
        }
    }
}

/// Task responsible for the internal clock.
///
/// Deadlines are accumulated rather than measured from wake-up, so scheduling latency doesn't make the tempo drift.
/// While an external clock is followed the timer keeps running but produces nothing.
#[embassy_executor::task]
async fn clock_task(controller: &'static ControllerAsyncMutex) -> ! {
    let mut deadline = Instant::now();
    loop {
        deadline += { controller.lock().await.tick_period() };
        Timer::at(deadline).await;
        controller.lock().await.on_timer();
    }
}

/// Handles button presses, cycling through the [`ArpMode`]s.
#[embassy_executor::task]
async fn arp_mode_input_task(
    mut button: ExtiInput<'static>,
    controller: &'static ControllerAsyncMutex,
    arp_mode: ArpModeSender<'static>,
) -> ! {
    loop {
        button.wait_for_rising_edge().await;
        let mode = controller.lock().await.cycle_arp_mode();
        info!("Arpeggiator mode is now {}", mode);
        arp_mode.send(mode);
    }
}

/// Starts split-learn. The LED stays lit until a key has been picked for each zone.
#[embassy_executor::task]
async fn split_learn_input_task(
    mut button: ExtiInput<'static>,
    mut led: Output<'static>,
    controller: &'static ControllerAsyncMutex,
) -> ! {
    const POLL_MS: u64 = 50;

    loop {
        button.wait_for_rising_edge().await;
        if !controller.lock().await.begin_split_learn(LEARNED_ZONE_CNT) {
            warn!("Can't split the keyboard into {} zones", LEARNED_ZONE_CNT);
            continue;
        }

        led.set_high();
        while controller.lock().await.zones().is_learning() {
            Timer::after_millis(POLL_MS).await;
        }
        led.set_low();
    }
}

/// Provides a quick and dirty status indicator for the [`ArpMode`].
///
/// Each cycle is divided in half. The LED remains dark for one half. For the other, the
/// LED lights up N times (where N is one more than the index of the selected mode).
#[embassy_executor::task]
async fn arp_mode_display_task(mut led: Output<'static>, mut arp_mode: ArpModeSpy<'static>) -> ! {
    const BLINK_SLEEP_MS: u64 = 1_000_000;

    loop {
        led.set_low();
        Timer::after_micros(BLINK_SLEEP_MS).await;

        let mode = unwrap!(arp_mode.try_get(), "Arpeggiator mode should never be uninitialized");
        // since the index starts with 0, 1 is added or else the LED wouldn't blink at all for Off
        let blink_cnt = (mode as u8).saturating_add(1);
        // mult by two to account for the "off" periods, sub 1 so the LED always starts and ends lit
        let animation_frames = blink_cnt * 2 - 1;
        let mut counter = animation_frames;
        while counter > 0 {
            led.toggle();
            Timer::after_micros(BLINK_SLEEP_MS / u64::from(animation_frames)).await;
            counter -= 1;
        }
    }
}

#[embassy_executor::task]
async fn usb_task(mut usb: UsbDevice<'static, UsbDriver>) -> ! {
    usb.run().await
}

#[embassy_executor::task]
async fn midi_in_task(
    mut receiver: MidiReceiver<'static, UsbDriver>,
    controller: &'static ControllerAsyncMutex,
) -> ! {
    loop {
        receiver.wait_connection().await;
        info!("USB connected");
        let _ = process_midi(&mut receiver, controller).await;
        info!("USB disconnected");
    }
}

#[embassy_executor::task]
async fn midi_out_task(mut sender: MidiSender<'static, UsbDriver>) -> ! {
    loop {
        sender.wait_connection().await;
        let _ = forward_packets(&mut sender).await;
        // whatever was queued for the previous host is stale
        PACKETS.clear();
    }
}

#[doc(hidden)]
struct Disconnected {}

impl From<EndpointError> for Disconnected {
    fn from(val: EndpointError) -> Self {
        match val {
            EndpointError::BufferOverflow => panic!("Buffer overflow"),
            EndpointError::Disabled => Disconnected {},
        }
    }
}

/// Helper function which hands data received over USB to the controller.
async fn process_midi<'d, T: usb::Instance + 'd>(
    receiver: &mut MidiReceiver<'d, usb::Driver<'d, T>>,
    controller: &'static ControllerAsyncMutex,
) -> Result<(), Disconnected> {
    let mut buf = [0; 64];
    loop {
        let n = receiver.read_packet(&mut buf).await?;
        controller.lock().await.midi_in(&buf[..n]);
    }
}

/// Helper function which writes queued packets to the host, batching as many as fit in one USB packet.
async fn forward_packets<'d, T: usb::Instance + 'd>(
    sender: &mut MidiSender<'d, usb::Driver<'d, T>>,
) -> Result<(), Disconnected> {
    let mut buf = [0; 64];
    loop {
        buf[..4].copy_from_slice(&PACKETS.receive().await);
        let mut n = 4;
        while n < buf.len() {
            let Ok(packet) = PACKETS.try_receive() else {
                break;
            };
            buf[n..n + 4].copy_from_slice(&packet);
            n += 4;
        }
        sender.write_packet(&buf[..n]).await?;
    }
}
