use crate::error::Result;
use crate::models::OwnAddress;

/// IPv4 addresses and netmasks of every interface on this host.
#[cfg(unix)]
pub fn own_addresses() -> Result<Vec<OwnAddress>> {
    use crate::error::RegistratorError;

    let mut head: *mut libc::ifaddrs = std::ptr::null_mut();
    if unsafe { libc::getifaddrs(&mut head) } != 0 {
        return Err(RegistratorError::InvalidConfig(format!(
            "failed to list host interfaces: {}",
            std::io::Error::last_os_error()
        )));
    }

    let mut addresses = Vec::new();
    let mut cursor = head;
    while !cursor.is_null() {
        let entry = unsafe { &*cursor };
        if let (Some(address), Some(netmask)) = (ipv4(entry.ifa_addr), ipv4(entry.ifa_netmask)) {
            addresses.push(OwnAddress::new(address, netmask));
        }
        cursor = entry.ifa_next;
    }
    unsafe { libc::freeifaddrs(head) };

    addresses.dedup();
    Ok(addresses)
}

#[cfg(not(unix))]
pub fn own_addresses() -> Result<Vec<OwnAddress>> {
    Ok(Vec::new())
}

#[cfg(unix)]
fn ipv4(sockaddr: *const libc::sockaddr) -> Option<std::net::Ipv4Addr> {
    if sockaddr.is_null() {
        return None;
    }
    let family = unsafe { (*sockaddr).sa_family };
    if i32::from(family) != libc::AF_INET {
        return None;
    }
    let sockaddr_in = unsafe { &*(sockaddr as *const libc::sockaddr_in) };
    Some(std::net::Ipv4Addr::from(u32::from_be(sockaddr_in.sin_addr.s_addr)))
}
