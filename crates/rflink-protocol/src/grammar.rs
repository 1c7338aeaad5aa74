//! Packet grammar used to validate lines before they are decoded.
//!
//! Every line coming off the wire is matched against the union of all known
//! packet families. Lines that match none of them are rejected; in practice
//! these are fragments left over in a read buffer (a partially written line
//! followed by a complete one) or noise on the serial line.
//!
//! ```text
//! 10;NewKaku;0cac142;3;ON;                              command, 3 fields
//! 10;MiLightv1;F746;00;3c00;ON;                         command, 4 fields
//! 10;MERTIK;64;UP;                                      command, 2 fields
//! 10;DELTRONIC;001c33;                                  command, address only
//! 10;REBOOT;  10;RTSRECCLEAN=9;                         control
//! 20;D3;OK;                                             response
//! 20;06;NewKaku;ID=008440e6;SWITCH=a;CMD=OFF;           device report
//! 20;00;Nodo RadioFrequencyLink - RFLink Gateway V1.1 - R46;  banner
//! 20;00;Internal Pullup on RF-in disabled;              info
//! 20;75;DEBUG;Pulses=90;Pulses(uSec)=1200,2760,120;     timing debug
//! 20;84;Debug;RTS P1;a63f33003cf000665a5a;              RTS debug
//! 20;01;RFDEBUG=ON;  20;01;setGPIO=OFF;                 toggles
//! 11;20;0B;NewKaku;ID=000005;SWITCH=2;CMD=ON;           echo
//! ```

use once_cell::sync::Lazy;
use regex::Regex;

/// Field delimiter used by every packet.
pub const DELIM: &str = ";";

const SEQUENCE: &str = "[0-9a-zA-Z]{2}";
const PROTOCOL: &str = "[^;]{3,}";
const ADDRESS: &str = "[0-9a-zA-Z]+";
const BUTTON: &str = "[0-9a-zA-Z]+";
const VALUE: &str = "[0-9a-zA-Z]+";
const COMMAND: &str = "[0-9a-zA-Z]+";
const CONTROL_COMMAND: &str = "[A-Z]+(=[A-Z0-9]+)?";
const DATA: &str = "[a-zA-Z0-9;=_]+";
const DEBUG_DATA_RTS: &str = "[a-zA-Z0-9;=_ ]+";
const DEBUG_DATA: &str = "[a-zA-Z0-9,;=_()]+";
const RESPONSES: &str = "OK";
const VERSION: &str = r"[0-9a-zA-Z \.-]+";
const DEBUG: &str = "DEBUG";
const MESSAGE: &str = r"[0-9a-zA-Z \._-]+";

const TOGGLES: &[&str] = &[
    "RFDEBUG=ON",
    "RFDEBUG=OFF",
    "RFUDEBUG=ON",
    "RFUDEBUG=OFF",
    "QRFDEBUG=ON",
    "QRFDEBUG=OFF",
    "setGPIO=ON",
    "setGPIO=OFF",
];

fn family(parts: &[&str]) -> String {
    parts.join(DELIM)
}

fn packet_pattern() -> String {
    let device = family(&["20", SEQUENCE, PROTOCOL, DATA]);

    let mut families = vec![
        family(&["20", SEQUENCE, VERSION]),
        format!("11;{}", device),
        family(&["20", SEQUENCE, RESPONSES]),
        device,
        family(&["10", PROTOCOL, ADDRESS, BUTTON, COMMAND]),
        family(&["10", PROTOCOL, ADDRESS, BUTTON, VALUE, COMMAND]),
        family(&["10", PROTOCOL, ADDRESS, COMMAND]),
        family(&["10", PROTOCOL, ADDRESS]),
        family(&["10", CONTROL_COMMAND]),
        family(&["20", SEQUENCE, DEBUG, DEBUG_DATA]),
        family(&["20", SEQUENCE, MESSAGE]),
        family(&["20", SEQUENCE, "Debug", DEBUG_DATA_RTS]),
    ];
    families.extend(TOGGLES.iter().map(|toggle| family(&["20", SEQUENCE, toggle])));

    format!("^({});$", families.join("|"))
}

static PACKET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&packet_pattern()).expect("packet grammar must compile"));

/// Check whether a line (without its CRLF terminator) is a valid packet.
///
/// ```
/// use rflink_protocol::is_valid_packet;
///
/// assert!(is_valid_packet("20;08;UPM/Esic;ID=1003;RAIN=0010;BAT=OK;"));
/// // leftovers of a partially written line in the read buffer
/// assert!(!is_valid_packet("20;00;N20;00;Nodo RadioFrequencyLink - RFLink Gateway V1.1 - R45"));
/// ```
pub fn is_valid_packet(line: &str) -> bool {
    PACKET_RE.is_match(line)
}
