use chrono::Utc;

use twilightbbs::door::dropfile::{write_door_sys, write_dorinfo};
use twilightbbs::door::{DoorProfile, DoorSession, DropFileKind};
use twilightbbs::user::User;

fn session(node_id: u32, drop_file: DropFileKind) -> DoorSession {
    let now = Utc::now();
    DoorSession {
        profile: DoorProfile {
            name: "DARKNESS".into(),
            command: "DARK.EXE {NODE}".into(),
            description: String::new(),
            drop_file,
            min_level: 0,
            multiuser: false,
        },
        user: User {
            id: 42,
            username: "alice".into(),
            password_hash: String::new(),
            real_name: "Alice Anderson".into(),
            location: "Oslo, Norway".into(),
            email: String::new(),
            security_level: 30,
            total_calls: 99,
            last_call_at: None,
            ansi_enabled: true,
            created_at: now,
            updated_at: now,
        },
        node_id,
        time_left_mins: 60,
        com_port: 1,
        baud_rate: 38400,
        bbs_name: "Twilight BBS".into(),
        sysop_name: "Sysop".into(),
    }
}

#[test]
fn door_sys_has_classic_field_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_door_sys(dir.path(), &session(3, DropFileKind::DoorSys)).unwrap();
    assert_eq!(path.file_name().unwrap(), "DOOR.SYS");

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.ends_with("\r\n"));

    let lines: Vec<&str> = content.trim_end_matches("\r\n").split("\r\n").collect();
    assert_eq!(lines.len(), 43);

    assert_eq!(lines[0], "COM1:"); // 1: COM port
    assert_eq!(lines[1], "38400"); // 2: baud
    assert_eq!(lines[2], "8"); // 3: data bits
    assert_eq!(lines[3], "3"); // 4: node number
    assert_eq!(lines[9], "alice"); // 10: user name
    assert_eq!(lines[10], "Oslo, Norway"); // 11: location
    assert_eq!(lines[13], ""); // 14: password never written
    assert_eq!(lines[14], "30"); // 15: security level
    assert_eq!(lines[15], "99"); // 16: total calls
    assert_eq!(lines[17], "3600"); // 18: seconds remaining
    assert_eq!(lines[18], "60"); // 19: minutes remaining
    assert_eq!(lines[19], "GR"); // 20: graphics mode
    assert_eq!(lines[20], "25"); // 21: screen height
    assert_eq!(lines[25], "42"); // 26: user record number
    assert_eq!(lines[30], "999999"); // 31: daily download K limit
}

#[test]
fn dorinfo_has_thirteen_lines_and_node_in_name() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_dorinfo(dir.path(), &session(3, DropFileKind::DorInfo)).unwrap();
    assert_eq!(path.file_name().unwrap(), "DORINFO3.DEF");

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.trim_end_matches("\r\n").split("\r\n").collect();
    assert_eq!(lines.len(), 13);

    assert_eq!(lines[0], "Twilight BBS"); // 1: BBS name
    assert_eq!(lines[1], "Sysop"); // 2: sysop first name
    assert_eq!(lines[3], "COM1"); // 4: COM port
    assert_eq!(lines[4], "38400 BAUD,N,8,1"); // 5: baud string
    assert_eq!(lines[5], "0"); // 6: network type
    assert_eq!(lines[6], "Alice"); // 7: user first name
    assert_eq!(lines[7], "Anderson"); // 8: user last name
    assert_eq!(lines[8], "Oslo, Norway"); // 9: location
    assert_eq!(lines[9], "1"); // 10: ANSI flag
    assert_eq!(lines[10], "30"); // 11: security level
    assert_eq!(lines[11], "60"); // 12: minutes remaining
    assert_eq!(lines[12], "-1"); // 13: fossil flag
}

// Re-reading the generated file yields the values that went in.
#[test]
fn door_sys_round_trips_through_a_parser() {
    let dir = tempfile::tempdir().unwrap();
    let s = session(7, DropFileKind::DoorSys);
    let path = write_door_sys(dir.path(), &s).unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.trim_end_matches("\r\n").split("\r\n").collect();

    let node: u32 = lines[3].parse().unwrap();
    let level: i64 = lines[14].parse().unwrap();
    let secs: i64 = lines[17].parse().unwrap();
    let mins: i64 = lines[18].parse().unwrap();

    assert_eq!(node, s.node_id);
    assert_eq!(level, s.user.security_level);
    assert_eq!(mins, s.time_left_mins);
    assert_eq!(secs, mins * 60);
}
