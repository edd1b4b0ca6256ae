//! Multi-threaded numbering and stock updates against one shared database

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use chrono::NaiveDate;
use doc_workflow::{
    Actor, DocumentService, DocumentType, EngineConfig, LinkedResource, NewRecord, Payload, Role,
    numbering::NumberingService,
};
use tempfile::tempdir;

const THREADS: usize = 8;
const PER_THREAD: usize = 25;

#[test]
fn concurrent_numbering_is_dense_and_unique() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = sled::open(temp_dir.path().join("numbering.db"))?;
    let numbers = NumberingService::new(&db, 4)?;
    let date = NaiveDate::from_ymd_opt(2024, 1, 30).ok_or_else(|| anyhow::anyhow!("bad date"))?;

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let numbers = numbers.clone();
            thread::spawn(move || {
                (0..PER_THREAD)
                    .map(|_| numbers.next("IN", date))
                    .collect::<Result<Vec<_>, _>>()
            })
        })
        .collect();

    let mut issued = BTreeSet::new();
    for handle in handles {
        for number in handle.join().expect("numbering thread panicked")? {
            assert!(issued.insert(number), "number issued twice");
        }
    }

    let expected: BTreeSet<String> = (1..=THREADS * PER_THREAD)
        .map(|seq| format!("IN20240130{seq:04}"))
        .collect();
    assert_eq!(issued, expected);

    Ok(())
}

#[test]
fn concurrent_creation_never_duplicates_numbers() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let service = Arc::new(DocumentService::open(&EngineConfig::at(
        temp_dir.path().join("creation.db"),
    ))?);

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let service = service.clone();
            thread::spawn(move || {
                let actor = Actor::new(format!("user_{i}"), "applicant", Role::Applicant);
                (0..PER_THREAD)
                    .map(|_| {
                        let draft = NewRecord::new(DocumentType::MaintenanceTicket)
                            .set("reporter", "Li Lei")
                            .set("assetName", "printer")
                            .set("fault", "paper jam");
                        service.create_record(draft, &actor).map(|r| r.document_number)
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
        })
        .collect();

    let mut numbers = BTreeSet::new();
    for handle in handles {
        for number in handle.join().expect("creation thread panicked")? {
            assert!(numbers.insert(number));
        }
    }
    assert_eq!(numbers.len(), THREADS * PER_THREAD);

    Ok(())
}

// Each order takes one unit from a shared resource. Transitions on different records
// must never overwrite each other's stock update.
#[test]
fn concurrent_decrements_on_distinct_records_compose() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let service = Arc::new(DocumentService::open(&EngineConfig::at(
        temp_dir.path().join("stock.db"),
    ))?);
    let applicant = Actor::generate("Li Lei", Role::Applicant)?;
    let approver = Actor::generate("Han Meimei", Role::Approver)?;

    let start = (THREADS * 2) as u64;
    service.register_resource(LinkedResource::new("S-1", "shredder", start, 1, 100))?;

    let mut orders = vec![];
    for _ in 0..THREADS {
        let order = service.create_record(
            NewRecord::new(DocumentType::ScrapOrder)
                .set("applicant", "Li Lei")
                .line_item("S-1", 1, 0),
            &applicant,
        )?;
        service.attempt_transition(&order.id, "approve", &approver, Payload::new())?;
        orders.push(order.id);
    }

    let handles: Vec<_> = orders
        .into_iter()
        .map(|id| {
            let service = service.clone();
            thread::spawn(move || {
                let keeper = Actor::new("user_keeper", "keeper", Role::Keeper);
                service.attempt_transition(&id, "process", &keeper, Payload::new())
            })
        })
        .collect();

    for handle in handles {
        let record = handle.join().expect("process thread panicked")?;
        assert_eq!(record.status, "processed");
    }
    assert_eq!(
        service.get_linked_resource("S-1")?.current_stock(),
        start - THREADS as u64
    );

    Ok(())
}
