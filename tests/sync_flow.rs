mod common;

use std::collections::BTreeSet;
use std::path::Path;

use common::{
    Call, FakeGateway, IMPORT_HEADER, SHEET_ID, TEMPLATE_ID, WORKSPACE_ID, header_row, num,
    purchasing_sheet, record, settings, text, write_workbook,
};
use procure_sheets::mapping::TargetSchema;
use procure_sheets::model::{CellValue, Key};
use procure_sheets::reconcile::{DUPLICATE_SUFFIX, FieldChange, InsertPlan};
use procure_sheets::sync::{
    self, DeleteOutcome, DeleteRequest, ImportOutcome, TableRequest, UpdateOutcome,
};
use procure_sheets::{ErrorKind, ToolError};
use tempfile::tempdir;

const SHEET: &str = "Job 1042";

fn write_takeoff(path: &Path, rows: &[(&str, f64, &str)]) {
    let mut content = vec![header_row(&IMPORT_HEADER)];
    for (item, qty, area) in rows {
        content.push(vec![
            text(item),
            text("Bolt"),
            num(*qty),
            text("EA"),
            text(area),
            CellValue::Null,
            text("Acme"),
        ]);
    }
    write_workbook(path, &[("Takeoff", content)]);
}

fn import_request(path: &Path) -> TableRequest {
    TableRequest::new(&settings(), path, None, None, SHEET, TargetSchema::import())
}

fn update_request(path: &Path) -> TableRequest {
    TableRequest::new(&settings(), path, None, None, SHEET, TargetSchema::update())
}

#[test]
fn import_into_empty_sheet_adds_every_row() {
    let temp_dir = tempdir().expect("temporary directory");
    let path = temp_dir.path().join("takeoff.xlsx");
    write_takeoff(&path, &[("A1", 5.0, "North")]);
    let gateway = FakeGateway::new(vec![purchasing_sheet(SHEET, &[])]);

    let outcome =
        sync::import_data(&gateway, &settings(), &import_request(&path), false).expect("import");
    assert_eq!(
        outcome,
        ImportOutcome::Inserted {
            rows: 1,
            tagged: BTreeSet::new()
        }
    );

    let expected = record(&[
        ("ITEM#", text("A1")),
        ("ITEM DESCRIPTION", text("Bolt")),
        ("QTY", num(5.0)),
        ("UOM", text("EA")),
        ("AREA", text("North")),
        ("NOTES", text("")),
        ("AWARDED TO", text("Acme")),
    ]);
    assert_eq!(
        gateway.calls(),
        vec![Call::Add {
            sheet_id: SHEET_ID,
            rows: vec![expected]
        }]
    );
}

#[test]
fn import_with_existing_key_writes_nothing() {
    let temp_dir = tempdir().expect("temporary directory");
    let path = temp_dir.path().join("takeoff.xlsx");
    write_takeoff(&path, &[("A1", 5.0, "North"), ("B2", 1.0, "South")]);
    let gateway = FakeGateway::new(vec![purchasing_sheet(
        SHEET,
        &[(1, vec![("ITEM#", text("A1")), ("QTY", num(3.0))])],
    )]);

    let outcome =
        sync::import_data(&gateway, &settings(), &import_request(&path), false).expect("import");
    assert_eq!(
        outcome,
        ImportOutcome::DuplicatesFound {
            keys: BTreeSet::from([Key::Text("A1".into())])
        }
    );
    assert_eq!(gateway.mutations(), 0);
}

#[test]
fn import_allowing_duplicates_tags_the_key() {
    let temp_dir = tempdir().expect("temporary directory");
    let path = temp_dir.path().join("takeoff.xlsx");
    write_takeoff(&path, &[("A1", 5.0, "North"), ("B2", 1.0, "South")]);
    let gateway = FakeGateway::new(vec![purchasing_sheet(
        SHEET,
        &[(1, vec![("ITEM#", text("A1"))])],
    )]);

    let prepared = sync::prepare_import(&gateway, &settings(), &import_request(&path), true)
        .expect("import prepared");
    assert_eq!(
        prepared.fields,
        vec![
            "ITEM#",
            "ITEM DESCRIPTION",
            "QTY",
            "UOM",
            "AREA",
            "NOTES",
            "AWARDED TO"
        ]
    );
    assert_eq!(gateway.mutations(), 0);

    let outcome = sync::apply_import(&gateway, &prepared).expect("import applied");
    let ImportOutcome::Inserted { rows, tagged } = outcome else {
        panic!("expected an insert");
    };
    assert_eq!(rows, 2);
    assert_eq!(tagged, BTreeSet::from([Key::Text("A1".into())]));

    let calls = gateway.calls();
    let [Call::Add { rows: added, .. }] = calls.as_slice() else {
        panic!("expected a single add call, got {calls:?}");
    };
    assert_eq!(added[0]["ITEM#"], text(&format!("A1{DUPLICATE_SUFFIX}")));
    assert_eq!(added[1]["ITEM#"], text("B2"));
}

#[test]
fn update_patches_the_changed_quantity() {
    let temp_dir = tempdir().expect("temporary directory");
    let path = temp_dir.path().join("takeoff.xlsx");
    write_takeoff(&path, &[("A1", 7.0, "North"), ("Z9", 1.0, "East")]);
    let gateway = FakeGateway::new(vec![purchasing_sheet(
        SHEET,
        &[
            (
                11,
                vec![
                    ("ITEM#", text("A1")),
                    ("ITEM DESCRIPTION", text("Bolt")),
                    ("QTY", num(5.0)),
                    ("AREA", text("North")),
                ],
            ),
            (
                12,
                vec![
                    ("ITEM#", text("B2")),
                    ("ITEM DESCRIPTION", text("Nut")),
                    ("QTY", num(9.0)),
                ],
            ),
        ],
    )]);

    let outcome =
        sync::update_data(&gateway, &settings(), &update_request(&path)).expect("update");
    assert_eq!(
        outcome,
        UpdateOutcome::Updated {
            rows: 1,
            cells: 1,
            unmatched: BTreeSet::from([Key::Text("Z9".into())])
        }
    );

    let calls = gateway.calls();
    let [Call::Update { sheet_id, patches }] = calls.as_slice() else {
        panic!("expected a single update call, got {calls:?}");
    };
    assert_eq!(*sheet_id, SHEET_ID);
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].row_id, 11);
    assert_eq!(patches[0].changes.len(), 1);
    assert_eq!(
        patches[0].changes["QTY"],
        FieldChange {
            old: num(5.0),
            new: num(7.0)
        }
    );
}

#[test]
fn update_of_matching_sheet_changes_nothing() {
    let temp_dir = tempdir().expect("temporary directory");
    let path = temp_dir.path().join("takeoff.xlsx");
    write_takeoff(&path, &[("A1", 5.0, "North")]);
    let gateway = FakeGateway::new(vec![purchasing_sheet(
        SHEET,
        &[(
            11,
            vec![
                ("ITEM#", text("A1")),
                ("ITEM DESCRIPTION", text("Bolt")),
                ("QTY", num(5.0)),
                ("AREA", text("North")),
            ],
        )],
    )]);

    let outcome =
        sync::update_data(&gateway, &settings(), &update_request(&path)).expect("update");
    assert_eq!(
        outcome,
        UpdateOutcome::NoDifferences {
            unmatched: BTreeSet::new()
        }
    );
    assert_eq!(gateway.mutations(), 0);
}

#[test]
fn unknown_sheet_is_a_lookup_error() {
    let temp_dir = tempdir().expect("temporary directory");
    let path = temp_dir.path().join("takeoff.xlsx");
    write_takeoff(&path, &[("A1", 5.0, "North")]);
    let gateway = FakeGateway::new(vec![purchasing_sheet("Job 9999", &[])]);

    let err = sync::import_data(&gateway, &settings(), &import_request(&path), false)
        .expect_err("sheet missing");
    assert!(matches!(err, ToolError::SheetNotFound(ref name) if name == SHEET));
    assert_eq!(err.kind(), ErrorKind::RemoteLookup);
    assert_eq!(gateway.mutations(), 0);
}

#[test]
fn sheet_without_mapped_columns_is_rejected() {
    let temp_dir = tempdir().expect("temporary directory");
    let path = temp_dir.path().join("takeoff.xlsx");
    write_takeoff(&path, &[("A1", 5.0, "North")]);
    let mut sheet = purchasing_sheet(SHEET, &[]);
    sheet.columns.retain(|column| column.title != "AWARDED TO");
    let gateway = FakeGateway::new(vec![sheet]);

    let err = sync::import_data(&gateway, &settings(), &import_request(&path), false)
        .expect_err("column missing");
    match err {
        ToolError::MissingColumns { sheet, columns } => {
            assert_eq!(sheet, SHEET);
            assert_eq!(columns, vec!["AWARDED TO"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(gateway.mutations(), 0);
}

#[test]
fn source_errors_stop_before_the_remote_sheet_is_touched() {
    let temp_dir = tempdir().expect("temporary directory");
    let path = temp_dir.path().join("takeoff.xlsx");
    write_workbook(
        &path,
        &[("Other", vec![header_row(&IMPORT_HEADER), vec![text("A1")]])],
    );
    let gateway = FakeGateway::new(vec![purchasing_sheet(SHEET, &[])]);

    let err = sync::import_data(&gateway, &settings(), &import_request(&path), false)
        .expect_err("tab missing");
    assert!(matches!(err, ToolError::TabNotFound { ref tab, .. } if tab == "Takeoff"));
    assert_eq!(gateway.mutations(), 0);
}

#[test]
fn dry_run_plan_reports_without_writing() {
    let temp_dir = tempdir().expect("temporary directory");
    let path = temp_dir.path().join("takeoff.xlsx");
    write_takeoff(&path, &[("A1", 5.0, "North")]);
    let gateway = FakeGateway::new(vec![purchasing_sheet(
        SHEET,
        &[(1, vec![("ITEM#", text("A1"))])],
    )]);

    let prepared = sync::prepare_import(&gateway, &settings(), &import_request(&path), false)
        .expect("import prepared");
    assert!(matches!(prepared.plan, InsertPlan::DuplicatesFound { .. }));
    assert_eq!(prepared.target.snapshot.row_count(), 1);
    assert_eq!(gateway.mutations(), 0);
}

#[test]
fn create_sheet_uses_the_template() {
    let gateway = FakeGateway::new(Vec::new());

    let sheet = sync::create_sheet(&gateway, &settings(), "  Job 2001 ").expect("sheet created");
    assert_eq!(sheet.name, "Job 2001");
    assert_eq!(
        gateway.calls(),
        vec![Call::Create {
            workspace_id: WORKSPACE_ID,
            template_id: TEMPLATE_ID,
            name: "Job 2001".into()
        }]
    );
}

#[test]
fn create_sheet_rejects_blank_names() {
    let gateway = FakeGateway::new(Vec::new());

    let err = sync::create_sheet(&gateway, &settings(), "   ").expect_err("blank name");
    assert!(matches!(err, ToolError::EmptySheetName));
    assert_eq!(err.kind(), ErrorKind::RemoteLookup);
    assert_eq!(gateway.mutations(), 0);
}

#[test]
fn list_sheets_is_sorted_by_name() {
    let mut second = purchasing_sheet("Alpha", &[]);
    second.id = 1;
    let gateway = FakeGateway::new(vec![purchasing_sheet("Zulu", &[]), second]);

    let sheets = sync::list_sheets(&gateway, &settings()).expect("sheets listed");
    let names: Vec<&str> = sheets.iter().map(|sheet| sheet.name.as_str()).collect();
    assert_eq!(names, vec!["Alpha", "Zulu"]);
}

#[test]
fn delete_removes_matching_rows_once() {
    let gateway = FakeGateway::new(vec![purchasing_sheet(
        SHEET,
        &[
            (1, vec![("ITEM#", text("A1"))]),
            (2, vec![("ITEM#", num(1001.0))]),
            (3, vec![("ITEM#", text("C3"))]),
        ],
    )]);
    let request = DeleteRequest {
        sheet_name: SHEET.into(),
        key_field: "ITEM#".into(),
        keys: vec!["A1".into(), "1001".into(), "A1".into(), "Q7".into()],
    };

    let outcome = sync::delete_rows(&gateway, &settings(), &request).expect("rows deleted");
    assert_eq!(
        outcome,
        DeleteOutcome::Deleted {
            rows: 2,
            missing: vec!["Q7".into()]
        }
    );
    assert_eq!(
        gateway.calls(),
        vec![Call::Delete {
            sheet_id: SHEET_ID,
            row_ids: vec![1, 2]
        }]
    );
}

#[test]
fn delete_removes_every_row_sharing_a_key() {
    let gateway = FakeGateway::new(vec![purchasing_sheet(
        SHEET,
        &[
            (1, vec![("ITEM#", text("A1")), ("QTY", num(1.0))]),
            (2, vec![("ITEM#", text("A1")), ("QTY", num(2.0))]),
            (3, vec![("ITEM#", text("B2"))]),
            (4, vec![("ITEM#", text("A1"))]),
        ],
    )]);
    let request = DeleteRequest {
        sheet_name: SHEET.into(),
        key_field: "ITEM#".into(),
        keys: vec!["A1".into()],
    };

    let outcome = sync::delete_rows(&gateway, &settings(), &request).expect("rows deleted");
    assert_eq!(
        outcome,
        DeleteOutcome::Deleted {
            rows: 3,
            missing: Vec::new()
        }
    );
    assert_eq!(
        gateway.calls(),
        vec![Call::Delete {
            sheet_id: SHEET_ID,
            row_ids: vec![1, 2, 4]
        }]
    );
}

#[test]
fn delete_by_unknown_column_is_rejected() {
    let gateway = FakeGateway::new(vec![purchasing_sheet(
        SHEET,
        &[(1, vec![("ITEM#", text("A1"))])],
    )]);
    let request = DeleteRequest {
        sheet_name: SHEET.into(),
        key_field: "SKU".into(),
        keys: vec!["A1".into()],
    };

    let err = sync::delete_rows(&gateway, &settings(), &request).expect_err("no such column");
    assert!(matches!(err, ToolError::MissingColumns { ref columns, .. } if columns == &vec!["SKU".to_string()]));
    assert_eq!(gateway.mutations(), 0);
}

#[test]
fn delete_without_matches_does_nothing() {
    let gateway = FakeGateway::new(vec![purchasing_sheet(SHEET, &[])]);
    let request = DeleteRequest {
        sheet_name: SHEET.into(),
        key_field: "ITEM#".into(),
        keys: vec!["A1".into()],
    };

    let outcome = sync::delete_rows(&gateway, &settings(), &request).expect("delete ran");
    assert_eq!(
        outcome,
        DeleteOutcome::NothingToDelete {
            missing: vec!["A1".into()]
        }
    );
    assert_eq!(gateway.mutations(), 0);
}
