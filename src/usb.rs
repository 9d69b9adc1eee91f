use embassy_stm32::usb_otg::{self, Driver};
use embassy_stm32::{bind_interrupts, peripherals};
use embassy_usb::class::cdc_acm::{CdcAcmClass, Receiver, Sender, State};
use embassy_usb::{Builder, Config, UsbDevice};
use pedal_assist::tasks::telemetry::packets;
use static_cell::StaticCell;

use crate::board::Usb;

bind_interrupts!(pub struct Irqs {
    OTG_FS => usb_otg::InterruptHandler<peripherals::USB_OTG_FS>;
});

pub type UsbDriver = Driver<'static, peripherals::USB_OTG_FS>;
pub type UsbSerial = CdcAcmClass<'static, UsbDriver>;
pub type UsbTx = Sender<'static, UsbDriver>;
pub type UsbRx = Receiver<'static, UsbDriver>;

/// Full-speed bulk endpoint size.
pub const PACKET_SIZE: usize = 64;

// Descriptor and endpoint buffers must outlive the device
static EP_OUT_BUFFER: StaticCell<[u8; 256]> = StaticCell::new();
static CONFIG_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static BOS_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static CONTROL_BUF: StaticCell<[u8; 64]> = StaticCell::new();
static CDC_STATE: StaticCell<State<'static>> = StaticCell::new();

#[embassy_executor::task]
pub async fn usb_task(mut device: UsbDevice<'static, UsbDriver>) -> ! {
    device.run().await
}

/// CDC-ACM status port. Call once.
pub fn init(usb: Usb) -> (UsbDevice<'static, UsbDriver>, UsbSerial) {
    let mut usb_config = usb_otg::Config::default();
    usb_config.vbus_detection = false;
    let driver = Driver::new_fs(usb.otg, Irqs, usb.dp, usb.dm, EP_OUT_BUFFER.init([0; 256]), usb_config);

    let mut config = Config::new(0xc0de, 0xcafe);
    config.manufacturer = Some("Pedal Assist");
    config.product = Some("Pedal Assist Controller");
    config.serial_number = Some("PAS00001");

    let mut builder = Builder::new(
        driver,
        config,
        CONFIG_DESC.init([0; 256]),
        BOS_DESC.init([0; 256]),
        &mut [], // msos_descs
        CONTROL_BUF.init([0; 64]),
    );
    let class = CdcAcmClass::new(&mut builder, CDC_STATE.init(State::new()), PACKET_SIZE as u16);
    let usb = builder.build();

    (usb, class)
}

/// Write a status line, split into endpoint-sized packets.
pub async fn write_line(tx: &mut UsbTx, line: &[u8]) -> bool {
    for packet in packets(line, PACKET_SIZE) {
        if tx.write_packet(packet).await.is_err() {
            return false;
        }
    }
    true
}
