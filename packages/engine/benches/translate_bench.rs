use blocksync_engine::schema::{Attributes, BlockId, BlockType, DocId, InlineRun};
use blocksync_engine::{Command, EngineConfig, EventTranslator, SyncSession};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

fn paragraph(parent: &BlockId, index: usize, text: String) -> Command {
    Command::InsertBlock {
        parent: parent.clone(),
        index,
        ty: BlockType::Paragraph,
        attributes: Attributes::new(),
        text: vec![InlineRun::plain(text)],
    }
}

/// Empty replica plus an update that adds `count` blocks to it, half of
/// them nested one level under the other half
fn document_with(count: usize) -> (Vec<u8>, Vec<u8>) {
    let mut session =
        SyncSession::create(DocId::from("bench"), "Bench", EngineConfig::default()).unwrap();
    let empty = session.encode_state();
    let page = session.page_id().clone();

    let mut parents = Vec::new();
    for i in 0..count / 2 {
        let outcome = session
            .execute(&paragraph(&page, i, format!("block {i}")))
            .unwrap();
        parents.push(outcome.block_id.unwrap());
    }
    let nested: Vec<Command> = parents
        .iter()
        .enumerate()
        .map(|(i, parent)| paragraph(parent, 0, format!("nested {i}")))
        .collect();
    session.execute_all(&nested).unwrap();

    let sv = SyncSession::open(DocId::from("bench"), &empty, EngineConfig::default())
        .unwrap()
        .state_vector();
    (empty, session.encode_diff(&sv).unwrap())
}

fn apply_remote_inserts(c: &mut Criterion) {
    for count in [100, 1000] {
        let (empty, update) = document_with(count);
        c.bench_function(&format!("apply_remote_inserts_{count}"), |b| {
            b.iter_batched(
                || SyncSession::open(DocId::from("bench"), &empty, EngineConfig::default()).unwrap(),
                |mut replica| replica.apply_remote_update(black_box(&update)).unwrap(),
                BatchSize::SmallInput,
            )
        });
    }
}

fn full_load(c: &mut Criterion) {
    let (empty, update) = document_with(1000);
    let mut replica = SyncSession::open(DocId::from("bench"), &empty, EngineConfig::default()).unwrap();
    replica.apply_remote_update(&update).unwrap();
    let config = EngineConfig::default();

    c.bench_function("full_load_1000", |b| {
        b.iter(|| {
            let view = replica.document().view();
            EventTranslator::load(black_box(&view), &config).unwrap()
        })
    });
}

fn local_split(c: &mut Criterion) {
    let mut session = SyncSession::create(DocId::from("bench"), "Bench", EngineConfig::default()).unwrap();
    let page = session.page_id().clone();
    let text = "lorem ipsum dolor sit amet ".repeat(8);
    let block = session
        .execute(&paragraph(&page, 0, text))
        .unwrap()
        .block_id
        .unwrap();

    c.bench_function("local_split_and_merge", |b| {
        b.iter(|| {
            let created = session
                .execute(&Command::SplitBlock {
                    block_id: block.clone(),
                    offset: black_box(100),
                })
                .unwrap()
                .block_id
                .unwrap();
            session
                .execute(&Command::MergeBlock {
                    block_id: created,
                    direction: blocksync_engine::MergeDirection::Backward,
                })
                .unwrap()
        })
    });
}

criterion_group!(benches, apply_remote_inserts, full_load, local_split);
criterion_main!(benches);
