// Licensed under the Apache-2.0 license

mod common;

use boot_image::{BinaryType, ImageError, LeadPacketHeader, SdCard, SlotId};
use common::{filesystem, setup, stored_hamming_code, Handler};
use embassy_futures::block_on;
use obc_bootloader::record::FramBootRecordStore;
use obc_bootloader::source::{FlashSource, ImageSource};
use obc_bootloader::{BootOutcome, BootResources, BootSelector, BootStatus};
use obc_config::{BootConfig, BootRecordStoreAsync, ObcMemoryMap};
use obc_image_handler::{Command, HandlerError, UplinkError, UplinkProgress};
use obc_testing::image::{hamming_code, image_crc, random_image};
use obc_testing::{
    CountingWatchdog, MemFlash, MemFram, RamExecMemory, RecordingReporter, TEST_EXEC_BASE,
};
use zerocopy::IntoBytes;

fn lead_packet(binary_type: BinaryType, packets: u16, size: u32, hamming_offset: u32) -> Vec<u8> {
    LeadPacketHeader::new(binary_type, packets, size, hamming_offset)
        .as_bytes()
        .to_vec()
}

/// Sends `binary` in packets of `packet_size` bytes.
fn upload(
    handler: &mut Handler<'_>,
    binary_type: BinaryType,
    binary: &[u8],
    hamming_offset: u32,
    packet_size: usize,
) -> Result<UplinkProgress, UplinkError> {
    let packets = binary.len().div_ceil(packet_size) as u16;
    let lead = lead_packet(binary_type, packets, binary.len() as u32, hamming_offset);
    block_on(handler.handle_lead_packet(&lead))?;
    let mut progress = Err(UplinkError::NoSession);
    for (sequence, data) in binary.chunks(packet_size).enumerate() {
        progress = block_on(handler.handle_data_packet(sequence as u16, data));
        progress?;
    }
    progress
}

/// Runs the bootloader against the NOR flash and the record left in `fram`.
fn boot_from_flash(
    fram: MemFram,
    flash: &MemFlash,
    map: &ObcMemoryMap,
) -> (BootOutcome, RamExecMemory, RecordingReporter) {
    let mut store = FramBootRecordStore::new(fram, map.boot_record_offset);
    let mut flash = FlashSource::from_memory_map(flash, map, true).unwrap();
    let mut sources: [&mut dyn ImageSource; 1] = [&mut flash];
    let mut memory = RamExecMemory::new(TEST_EXEC_BASE, 0x1_0000);
    let mut watchdog = CountingWatchdog::default();
    let mut reporter = RecordingReporter::default();
    let outcome = BootSelector::new(
        BootConfig::default(),
        BootResources {
            store: &mut store,
            sources: &mut sources,
            memory: &mut memory,
            watchdog: &mut watchdog,
            reporter: Some(&mut reporter),
        },
    )
    .run();
    (outcome, memory, reporter)
}

#[test]
fn test_uplinked_nor_image_boots_with_hamming() {
    let fixture = setup();
    let image = random_image(20, 3000);
    let code = hamming_code(&image);
    let binary = [image.clone(), code.clone()].concat();
    let mut handler = fixture.handler(filesystem(&[]), 1024);

    // Packet 5 carries the end of the image and the whole code.
    assert_eq!(
        upload(&mut handler, BinaryType::NorFlash, &binary, 3000, 512),
        Ok(UplinkProgress::Complete(SlotId::NorFlash))
    );
    assert!(!handler.is_busy());
    assert_eq!(fixture.partition(SlotId::NorFlash, image.len()), image);

    let record = fixture.record();
    let nor = record.slot(SlotId::NorFlash);
    assert_eq!(nor.binary_size, 3000);
    assert_eq!(nor.hamming_code_size, code.len() as u32);
    assert!(nor.hamming_enabled);
    assert_eq!(nor.image_crc, Some(image_crc(&image)));
    assert_eq!(nor.reboot_counter, 0);
    assert_eq!(record.pending_update, Some(SlotId::NorFlash));
    block_on(handler.execute_command(Command::SetGlobalHammingFlag { enabled: true })).unwrap();

    drop(handler);
    let (offset, _) = fixture.map.nor_partition(SlotId::NorFlash).unwrap();
    fixture.flash.flip_bit(offset as usize + 1234, 3);
    let map = fixture.map;
    let fram = fixture.store.into_bus();
    assert_eq!(
        stored_hamming_code(&fram, &map, SlotId::NorFlash, code.len()),
        code
    );

    // The bootloader picks the update and repairs the flipped bit.
    let (outcome, memory, reporter) = boot_from_flash(fram, &fixture.flash, &map);
    match outcome {
        BootOutcome::Ready(validated) => assert_eq!(validated.slot(), SlotId::NorFlash),
        BootOutcome::Exhausted => panic!("uplinked image did not boot"),
    }
    assert_eq!(memory.contents(image.len()), &image[..]);
    assert_eq!(
        reporter.last().unwrap().status,
        BootStatus::HammingSingleBitCorrected
    );
}

#[test]
fn test_interrupted_upload_does_not_boot() {
    let fixture = setup();
    let image = random_image(25, 3000);
    let (offset, _) = fixture.map.nor_partition(SlotId::NorFlash).unwrap();
    fixture.flash.load(offset as usize, &image);
    let info = boot_image::SlotImageInfo {
        binary_size: 3000,
        hamming_code_size: 0,
        hamming_enabled: false,
        image_crc: None,
    };
    block_on(fixture.store.write_slot_image_info(SlotId::NorFlash, &info)).unwrap();
    let mut handler = fixture.handler(filesystem(&[]), 1024);

    let replacement = random_image(26, 3000);
    block_on(async {
        let lead = lead_packet(BinaryType::NorFlash, 6, 3000, 0);
        handler.handle_lead_packet(&lead).await.unwrap();
        assert_eq!(
            handler.handle_data_packet(0, &replacement[..512]).await,
            Ok(UplinkProgress::Accepted { received: 512 })
        );
    });
    // The link drops here and the board resets.
    drop(handler);
    let nor = *fixture.record().slot(SlotId::NorFlash);
    assert_eq!(nor.binary_size, 0);
    assert_eq!(nor.image_crc, None);

    let map = fixture.map;
    let fram = fixture.store.into_bus();
    let (outcome, _, reporter) = boot_from_flash(fram, &fixture.flash, &map);
    assert!(matches!(outcome, BootOutcome::Exhausted));
    assert_eq!(reporter.last().unwrap().booted_slot, None);
}

#[test]
fn test_uplinked_sd_image_without_hamming() {
    let fixture = setup();
    let image = random_image(21, 2000);
    let mut fs = filesystem(&[]);
    fs.add_directory(SdCard::Sd1, "BIN/OBSW");
    let mut handler = fixture.handler(fs, 1024);

    assert_eq!(
        upload(&mut handler, BinaryType::SdCard2Slot2, &image, 0, 300),
        Ok(UplinkProgress::Complete(SlotId::Sdc1Slot1))
    );
    assert_eq!(
        handler.filesystem().file(SdCard::Sd1, "BIN/OBSW/obsw_sl1.bin"),
        Some(&image[..])
    );
    assert!(handler.filesystem().is_balanced());

    let record = fixture.record();
    let slot = record.slot(SlotId::Sdc1Slot1);
    assert_eq!(slot.binary_size, 2000);
    assert_eq!(slot.hamming_code_size, 0);
    assert!(!slot.hamming_enabled);
    assert_eq!(record.pending_update, Some(SlotId::Sdc1Slot1));
}

#[test]
fn test_uplinked_bootloader_is_not_marked_pending() {
    let fixture = setup();
    let bootloader = random_image(22, 1500);
    let mut handler = fixture.handler(filesystem(&[]), 1024);

    assert_eq!(
        upload(&mut handler, BinaryType::Bootloader, &bootloader, 0, 1024),
        Ok(UplinkProgress::Complete(SlotId::BootloaderPrimary))
    );
    assert_eq!(
        fixture.partition(SlotId::BootloaderPrimary, bootloader.len()),
        bootloader
    );
    assert_eq!(fixture.record().pending_update, None);
}

#[test]
fn test_lead_packet_clears_hamming_flag() {
    let fixture = setup();
    block_on(fixture.store.set_hamming_flag(SlotId::Sdc0Slot0, true)).unwrap();
    let mut fs = filesystem(&[]);
    fs.add_directory(SdCard::Sd0, "BIN/OBSW");
    let mut handler = fixture.handler(fs, 1024);

    let lead = lead_packet(BinaryType::SdCard1Slot1, 4, 4000, 0);
    assert_eq!(
        block_on(handler.handle_lead_packet(&lead)),
        Ok(SlotId::Sdc0Slot0)
    );
    assert!(handler.is_busy());
    assert!(!fixture.record().slot(SlotId::Sdc0Slot0).hamming_enabled);
}

#[test]
fn test_out_of_sequence_packet_is_rejected() {
    let fixture = setup();
    let image = random_image(23, 3000);
    let mut handler = fixture.handler(filesystem(&[]), 1024);
    let packets: Vec<&[u8]> = image.chunks(1000).collect();

    block_on(async {
        let lead = lead_packet(BinaryType::NorFlash, 3, 3000, 0);
        handler.handle_lead_packet(&lead).await.unwrap();
        assert_eq!(
            handler.handle_data_packet(0, packets[0]).await,
            Ok(UplinkProgress::Accepted { received: 1000 })
        );
        assert_eq!(
            handler.handle_data_packet(2, packets[2]).await,
            Err(UplinkError::OutOfSequence {
                expected: 1,
                received: 2
            })
        );
        assert_eq!(
            handler.handle_data_packet(0, packets[0]).await,
            Err(UplinkError::OutOfSequence {
                expected: 1,
                received: 0
            })
        );
        handler.handle_data_packet(1, packets[1]).await.unwrap();
        assert_eq!(
            handler.handle_data_packet(2, packets[2]).await,
            Ok(UplinkProgress::Complete(SlotId::NorFlash))
        );
    });
    assert_eq!(fixture.partition(SlotId::NorFlash, image.len()), image);
}

#[test]
fn test_data_without_lead_packet() {
    let fixture = setup();
    let mut handler = fixture.handler(filesystem(&[]), 1024);
    assert_eq!(
        block_on(handler.handle_data_packet(0, &[1, 2, 3])),
        Err(UplinkError::NoSession)
    );
}

#[test]
fn test_excess_data_ends_upload() {
    let fixture = setup();
    let mut handler = fixture.handler(filesystem(&[]), 1024);
    block_on(async {
        let lead = lead_packet(BinaryType::NorFlash, 2, 1000, 0);
        handler.handle_lead_packet(&lead).await.unwrap();
        handler.handle_data_packet(0, &[0x5a; 600]).await.unwrap();
        assert_eq!(
            handler.handle_data_packet(1, &[0x5a; 600]).await,
            Err(UplinkError::TooMuchData)
        );
        assert_eq!(
            handler.handle_data_packet(1, &[0x5a; 400]).await,
            Err(UplinkError::NoSession)
        );
    });
    assert_eq!(fixture.record().slot(SlotId::NorFlash).binary_size, 0);
}

#[test]
fn test_missing_data_fails_last_packet() {
    let fixture = setup();
    let mut handler = fixture.handler(filesystem(&[]), 1024);
    block_on(async {
        let lead = lead_packet(BinaryType::NorFlash, 2, 1000, 0);
        handler.handle_lead_packet(&lead).await.unwrap();
        handler.handle_data_packet(0, &[0xa5; 300]).await.unwrap();
        assert_eq!(
            handler.handle_data_packet(1, &[0xa5; 300]).await,
            Err(UplinkError::SizeMismatch {
                expected: 1000,
                received: 600
            })
        );
    });
    assert!(!handler.is_busy());
    assert_eq!(fixture.record().pending_update, None);
}

#[test]
fn test_invalid_lead_packets() {
    let fixture = setup();
    block_on(fixture.store.set_hamming_flag(SlotId::NorFlash, true)).unwrap();
    let mut handler = fixture.handler(filesystem(&[]), 1024);

    let mut header = LeadPacketHeader::new(BinaryType::NorFlash, 1, 100, 0);
    header.binary_type = 9;
    assert_eq!(
        block_on(handler.handle_lead_packet(header.as_bytes())),
        Err(UplinkError::LeadPacket(ImageError::InvalidBinaryType(9)))
    );
    assert_eq!(
        block_on(handler.handle_lead_packet(&[1, 2, 3])),
        Err(UplinkError::LeadPacket(ImageError::InvalidLength))
    );
    // A Hamming offset must leave exactly the code of the image behind it.
    let lead = lead_packet(BinaryType::NorFlash, 1, 1000, 900);
    assert_eq!(
        block_on(handler.handle_lead_packet(&lead)),
        Err(UplinkError::LeadPacket(ImageError::InvalidHammingOffset))
    );

    assert!(!handler.is_busy());
    assert!(fixture.record().slot(SlotId::NorFlash).hamming_enabled);
}

#[test]
fn test_oversized_bootloader_upload_is_rejected() {
    let fixture = setup();
    let mut handler = fixture.handler(filesystem(&[]), 1024);
    let lead = lead_packet(BinaryType::Bootloader, 100, 0x1_0001, 0);
    assert_eq!(
        block_on(handler.handle_lead_packet(&lead)),
        Err(UplinkError::Handler(HandlerError::TooLarge {
            size: 0x1_0001,
            capacity: 0x1_0000
        }))
    );
}

#[test]
fn test_upload_waits_for_running_operation() {
    let fixture = setup();
    let image = random_image(24, 1000);
    let fs = filesystem(&[(SdCard::Sd0, "BIN/OBSW/obsw_sl0.bin", &image[..])]);
    let mut handler = fixture.handler(fs, 1024);
    block_on(handler.execute_command(Command::CopySdcImageToFlash {
        source: SlotId::Sdc0Slot0,
    }))
    .unwrap();

    let lead = lead_packet(BinaryType::SdCard1Slot2, 1, 100, 0);
    assert_eq!(
        block_on(handler.handle_lead_packet(&lead)),
        Err(UplinkError::Handler(HandlerError::Busy))
    );
}
